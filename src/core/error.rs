//! 流水线错误类型
//!
//! - MissingFields：generate 同步返回，不会创建 Job
//! - 其余变体在 run 顶层被统一捕获，写入 Job.error 并把 Job 标记为 failed
//! - 技能拆解服务失败、校验失败、审批交接失败都不会以错误形式出现在这里

use thiserror::Error;

use crate::llm::LlmError;
use crate::path::CanonicalizeError;
use crate::prompts::PromptError;

/// 协作方（台账、仓储、审批）错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 编排器错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing required fields: {0}")]
    MissingFields(String),

    #[error("AI completion failed during {stage}: {source}")]
    Completion {
        stage: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("could not read learning path from AI output: {0}")]
    Canonicalize(#[from] CanonicalizeError),

    #[error("prompt template error: {0}")]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn completion(stage: crate::jobs::JobStage, source: LlmError) -> Self {
        Self::Completion {
            stage: stage.as_str(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStage;

    #[test]
    fn test_messages_are_job_friendly() {
        let err = PipelineError::MissingFields("userId, companyId".into());
        assert_eq!(err.to_string(), "missing required fields: userId, companyId");

        let err = PipelineError::completion(JobStage::PathCreation, LlmError::Timeout(500));
        assert_eq!(
            err.to_string(),
            "AI completion failed during path-creation: completion timed out after 500 ms"
        );

        let err = PipelineError::from(StoreError::NotFound("job x".into()));
        assert_eq!(err.to_string(), "not found: job x");
    }
}
