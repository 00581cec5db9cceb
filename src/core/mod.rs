//! 核心编排层：错误、按键互斥、运行监管、审批决策、编排器与构建器

pub mod approval;
pub mod builder;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod supervisor;

pub use approval::ApprovalDecision;
pub use builder::{create_llm_from_config, select_backend, LlmBackend, PipelineBuilder};
pub use error::{PipelineError, StoreError};
pub use locks::{run_key, KeyedLocks};
pub use orchestrator::{
    Collaborators, JobReceipt, PathGenerator, Pipeline, PipelineSettings, RunMode, RunSummary,
};
pub use supervisor::{RunSupervisor, ORPHANED_BY_RESTART, RUN_PANICKED};
