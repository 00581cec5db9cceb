//! LLM 层：补全客户端抽象与实现（OpenAI 兼容 / Scripted）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{sample_learning_path, sample_output, ScriptedCompletionClient};
pub use openai::OpenAiCompletionClient;
pub use traits::{
    extract_json_block, CompletionClient, CompletionContext, CompletionOptions, CompletionOutput,
    LlmError,
};
