//! AI 补全客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Scripted）实现 CompletionClient。
//! 返回值可能是结构化 JSON，也可能是需要再解析的文本，两者都必须容忍。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::jobs::JobStage;

/// 补全调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("completion timed out after {0} ms")]
    Timeout(u64),

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion returned no content")]
    EmptyResponse,

    #[error("completion output is not valid JSON: {0}")]
    InvalidOutput(String),
}

/// 单次调用的超时与重试预算（重试由客户端自身完成，编排器不再重试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOptions {
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 2,
        }
    }
}

/// 调用上下文：便于后端记录日志或按阶段路由
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionContext {
    pub job_id: String,
    pub user_id: String,
    pub stage: JobStage,
    pub attempt: u32,
}

/// 补全结果：结构化 JSON 或原始文本
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutput {
    Json(Value),
    Text(String),
}

impl CompletionOutput {
    /// 严格取 JSON：文本时提取 ```json 块或首个 {/[ 到末尾 }/] 之间的内容再解析
    pub fn to_json(&self) -> Result<Value, LlmError> {
        match self {
            Self::Json(value) => match value {
                // 有些后端把 JSON 再包一层字符串
                Value::String(s) => parse_embedded_json(s),
                other => Ok(other.clone()),
            },
            Self::Text(text) => parse_embedded_json(text),
        }
    }

    /// 宽松取值：能解析为 JSON 就用 JSON，否则保留为字符串
    pub fn into_value(self) -> Value {
        match self.to_json() {
            Ok(value) => value,
            Err(_) => match self {
                Self::Json(value) => value,
                Self::Text(text) => Value::String(text),
            },
        }
    }
}

impl From<Value> for CompletionOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for CompletionOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// 从 LLM 文本中切出 JSON 片段
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    match (open, close) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_embedded_json(text: &str) -> Result<Value, LlmError> {
    let block = extract_json_block(text);
    serde_json::from_str(block).map_err(|e| {
        let preview: String = block.chars().take(120).collect();
        LlmError::InvalidOutput(format!("{e}: {preview}"))
    })
}

/// AI 补全服务
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        context: &CompletionContext,
        options: &CompletionOptions,
    ) -> Result<CompletionOutput, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_from_fenced_text() {
        let out = CompletionOutput::Text("Here you go:\n```json\n{\"a\": 1}\n```\nthanks".into());
        assert_eq!(out.to_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_to_json_from_bare_array_with_prose() {
        let out = CompletionOutput::Text("result: [\"x\", \"y\"] done".into());
        assert_eq!(out.to_json().unwrap(), json!(["x", "y"]));
    }

    #[test]
    fn test_to_json_unwraps_string_value() {
        let out = CompletionOutput::Json(Value::String("{\"k\":true}".into()));
        assert_eq!(out.to_json().unwrap(), json!({"k": true}));
    }

    #[test]
    fn test_into_value_keeps_plain_text() {
        let out = CompletionOutput::Text("no json here".into());
        assert_eq!(out.into_value(), Value::String("no json here".into()));
    }

    #[test]
    fn test_to_json_reports_invalid_output() {
        let out = CompletionOutput::Text("{broken".into());
        assert!(matches!(out.to_json(), Err(LlmError::InvalidOutput(_))));
    }
}
