//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；DeepSeek 与 OpenAI 都走这里。
//! 超时与重试预算由 CompletionOptions 决定，重试耗尽后返回最后一次错误。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionClient, CompletionContext, CompletionOptions, CompletionOutput, LlmError};

const SYSTEM_PROMPT: &str =
    "You are a curriculum designer. Always answer with a single valid JSON document and nothing else.";

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiCompletionClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn build_messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.build_messages(prompt)?)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        context: &CompletionContext,
        options: &CompletionOptions,
    ) -> Result<CompletionOutput, LlmError> {
        let timeout = Duration::from_millis(options.timeout_ms);
        let mut last_error = LlmError::EmptyResponse;

        for attempt in 0..=options.max_retries {
            let result = match tokio::time::timeout(timeout, self.complete_once(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(options.timeout_ms)),
            };
            match result {
                Ok(content) => return Ok(CompletionOutput::Text(content)),
                Err(e) => {
                    tracing::warn!(
                        job_id = %context.job_id,
                        stage = %context.stage,
                        attempt = attempt + 1,
                        error = %e,
                        "completion attempt failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
