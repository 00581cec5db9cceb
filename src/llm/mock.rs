//! Scripted 补全客户端（用于测试与本地演示，无需 API）
//!
//! 按阶段排队预置响应；队列耗尽时回落到该阶段的默认响应，没有默认响应则报错。
//! 记录每次收到的 prompt，便于断言重试时附加的校验反馈。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::jobs::JobStage;
use crate::llm::{CompletionClient, CompletionContext, CompletionOptions, CompletionOutput, LlmError};

#[derive(Default)]
struct Script {
    queued: HashMap<JobStage, VecDeque<Result<CompletionOutput, LlmError>>>,
    defaults: HashMap<JobStage, CompletionOutput>,
    prompts: HashMap<JobStage, Vec<String>>,
}

/// 按阶段回放预置响应的客户端
#[derive(Default)]
pub struct ScriptedCompletionClient {
    script: Mutex<Script>,
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 三个 AI 阶段都带有可通过校验的示例响应
    pub fn with_sample_responses() -> Self {
        let client = Self::new();
        for stage in [
            JobStage::SkillExpansion,
            JobStage::CompetencyIdentification,
            JobStage::PathCreation,
        ] {
            if let Some(sample) = sample_output(stage) {
                client.set_default(stage, sample);
            }
        }
        client
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加一条成功响应
    pub fn push(&self, stage: JobStage, output: impl Into<CompletionOutput>) {
        self.script()
            .queued
            .entry(stage)
            .or_default()
            .push_back(Ok(output.into()));
    }

    /// 追加一条失败响应
    pub fn push_error(&self, stage: JobStage, error: LlmError) {
        self.script()
            .queued
            .entry(stage)
            .or_default()
            .push_back(Err(error));
    }

    /// 队列为空时使用的响应
    pub fn set_default(&self, stage: JobStage, output: impl Into<CompletionOutput>) {
        self.script().defaults.insert(stage, output.into());
    }

    /// 某阶段被调用的次数
    pub fn call_count(&self, stage: JobStage) -> usize {
        self.script().prompts.get(&stage).map(Vec::len).unwrap_or(0)
    }

    /// 某阶段收到的全部 prompt（按调用顺序）
    pub fn prompts(&self, stage: JobStage) -> Vec<String> {
        self.script().prompts.get(&stage).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        context: &CompletionContext,
        _options: &CompletionOptions,
    ) -> Result<CompletionOutput, LlmError> {
        let mut script = self.script();
        script
            .prompts
            .entry(context.stage)
            .or_default()
            .push(prompt.to_string());

        if let Some(next) = script
            .queued
            .get_mut(&context.stage)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        script.defaults.get(&context.stage).cloned().ok_or_else(|| {
            LlmError::Request(format!("no scripted response for stage {}", context.stage))
        })
    }
}

/// 各 AI 阶段的示例输出（同时用作演示数据）
pub fn sample_output(stage: JobStage) -> Option<CompletionOutput> {
    let value: Value = match stage {
        JobStage::SkillExpansion => json!({
            "expanded_competencies_list": [
                {"competency_name": "JavaScript Foundations"},
                {"competency_name": "React Development"},
                {"competency_name": "Frontend Architecture"}
            ]
        }),
        JobStage::CompetencyIdentification => json!({
            "competencies": [
                {"competency_name": "JavaScript Foundations", "target_level": "beginner"},
                {"competency_name": "React Development", "target_level": "intermediate"},
                {"competency_name": "Frontend Architecture", "target_level": "advanced"}
            ]
        }),
        JobStage::PathCreation => sample_learning_path(),
        _ => return None,
    };
    Some(CompletionOutput::Json(value))
}

/// 一条满足全部校验规则的现代格式学习路径
pub fn sample_learning_path() -> Value {
    json!({
        "path_title": "Frontend Developer Path",
        "learner_id": "learner-1",
        "total_estimated_duration_hours": 18,
        "learning_modules": [
            {
                "module_order": 1,
                "module_title": "JavaScript Foundations",
                "estimated_duration_hours": 4,
                "skills_in_module": ["JavaScript Basics", "Variables and Data Types"],
                "steps": [
                    {"step": 1, "title": "Language tour", "description": "Core syntax", "estimated_time": "2 hours", "skills_covered": ["JavaScript Basics"]},
                    {"step": 2, "title": "Working with values", "description": "Primitive types", "estimated_time": "2 hours", "skills_covered": ["Variables and Data Types"]}
                ]
            },
            {
                "module_order": 2,
                "module_title": "Building With React",
                "estimated_duration_hours": 6,
                "skills_in_module": ["React Hooks", "State Management"],
                "steps": [
                    {"step": 1, "title": "Hooks", "description": "useState and useEffect", "estimated_time": "3 hours", "skills_covered": ["React Hooks"]},
                    {"step": 2, "title": "State", "description": "Lifting and sharing state", "estimated_time": "3 hours", "skills_covered": ["State Management"]}
                ]
            },
            {
                "module_order": 3,
                "module_title": "Scaling Frontends",
                "estimated_duration_hours": 8,
                "skills_in_module": ["Performance Optimization", "Frontend Architecture"],
                "steps": [
                    {"step": 1, "title": "Profiling", "description": "Find and fix slow renders", "estimated_time": "4 hours", "skills_covered": ["Performance Optimization"]},
                    {"step": 2, "title": "Structure", "description": "Module boundaries", "estimated_time": "4 hours", "skills_covered": ["Frontend Architecture"]}
                ]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(stage: JobStage) -> CompletionContext {
        CompletionContext {
            job_id: "job-1".into(),
            user_id: "u1".into(),
            stage,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let client = ScriptedCompletionClient::new();
        client.push(JobStage::SkillExpansion, "first");
        client.set_default(JobStage::SkillExpansion, "fallback");
        let opts = CompletionOptions::default();

        let a = client.complete("p1", &ctx(JobStage::SkillExpansion), &opts).await.unwrap();
        let b = client.complete("p2", &ctx(JobStage::SkillExpansion), &opts).await.unwrap();
        assert_eq!(a, CompletionOutput::Text("first".into()));
        assert_eq!(b, CompletionOutput::Text("fallback".into()));
        assert_eq!(client.prompts(JobStage::SkillExpansion), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_unscripted_stage_fails() {
        let client = ScriptedCompletionClient::new();
        let result = client
            .complete("p", &ctx(JobStage::PathCreation), &CompletionOptions::default())
            .await;
        assert!(matches!(result, Err(LlmError::Request(_))));
        assert_eq!(client.call_count(JobStage::PathCreation), 1);
    }
}
