//! Job 台账：生成任务的进度 / 结果 / 错误记录

pub mod ledger;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

pub use ledger::{
    InMemoryJobLedger, Job, JobEvent, JobId, JobLedger, JobStage, JobStatus, JobUpdate,
    LEARNING_PATH_JOB,
};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteJobLedger;
