//! 可观测性：tracing 订阅器初始化 + 流水线事件观察者
//!
//! 编排器不直接写日志，而是通过注入的 [`PipelineObserver`] 报告事件；
//! 默认实现 [`TracingObserver`] 转成结构化 tracing 事件。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::jobs::{JobId, JobStage, JobStatus};

/// 初始化日志（默认 info，RUST_LOG 覆盖）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 流水线事件
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, job_id: &JobId, stage: JobStage);

    fn stage_completed(&self, job_id: &JobId, stage: JobStage, progress: u8);

    /// 第 attempt 次生成的路径未通过校验
    fn validation_failed(&self, job_id: &JobId, attempt: u32, errors: &[String]);

    /// 技能分类服务失败，改用回退数据
    fn fallback_used(&self, job_id: &JobId, reason: &str);

    /// 审批交接失败（Job 仍为 completed）
    fn handoff_failed(&self, job_id: &JobId, reason: &str);

    fn job_finished(&self, job_id: &JobId, status: JobStatus, error: Option<&str>);
}

/// 把事件写成 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn stage_started(&self, job_id: &JobId, stage: JobStage) {
        tracing::debug!(job_id = %job_id, stage = %stage, "stage started");
    }

    fn stage_completed(&self, job_id: &JobId, stage: JobStage, progress: u8) {
        tracing::info!(job_id = %job_id, stage = %stage, progress, "stage completed");
    }

    fn validation_failed(&self, job_id: &JobId, attempt: u32, errors: &[String]) {
        tracing::warn!(
            job_id = %job_id,
            attempt,
            violations = errors.len(),
            details = %errors.join("; "),
            "learning path failed validation"
        );
    }

    fn fallback_used(&self, job_id: &JobId, reason: &str) {
        tracing::warn!(job_id = %job_id, reason, "taxonomy unavailable, using fallback breakdown");
    }

    fn handoff_failed(&self, job_id: &JobId, reason: &str) {
        tracing::error!(job_id = %job_id, reason, "approval handoff failed");
    }

    fn job_finished(&self, job_id: &JobId, status: JobStatus, error: Option<&str>) {
        match error {
            Some(error) => tracing::error!(job_id = %job_id, status = %status, error, "job finished"),
            None => tracing::info!(job_id = %job_id, status = %status, "job finished"),
        }
    }
}
