//! Job 台账
//!
//! 每次生成请求对应一条 Job，由编排器通过局部更新推进（阶段、进度、结果、错误）；
//! 调用方只能按 id 轮询观察。终态为 completed / failed。
//!
//! 内存版会在每次创建 / 更新时发出 JobEvent，测试和演示据此观察进度序列。

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::core::StoreError;

pub type JobId = String;

/// 本流水线产生的 Job 类型
pub const LEARNING_PATH_JOB: &str = "learning-path-generation";

/// Job 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流水线阶段（currentStage）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStage {
    SkillExpansion,
    CompetencyIdentification,
    SkillBreakdown,
    PathCreation,
    Completed,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkillExpansion => "skill-expansion",
            Self::CompetencyIdentification => "competency-identification",
            Self::SkillBreakdown => "skill-breakdown",
            Self::PathCreation => "path-creation",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skill-expansion" => Some(Self::SkillExpansion),
            "competency-identification" => Some(Self::CompetencyIdentification),
            "skill-breakdown" => Some(Self::SkillBreakdown),
            "path-creation" => Some(Self::PathCreation),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job 记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub user_id: String,
    pub company_id: String,
    pub competency_target_name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub current_stage: Option<JobStage>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// 毫秒时间戳
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// 新建 pending 状态的生成任务
    pub fn new(
        user_id: impl Into<String>,
        company_id: impl Into<String>,
        competency_target_name: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("job_{}", uuid::Uuid::new_v4()),
            user_id: user_id.into(),
            company_id: company_id.into(),
            competency_target_name: competency_target_name.into(),
            job_type: LEARNING_PATH_JOB.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            current_stage: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

/// 局部更新：只覆盖为 Some 的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_stage: Option<JobStage>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    /// 推进到某阶段并设置进度
    pub fn stage(stage: JobStage, progress: u8) -> Self {
        Self {
            current_stage: Some(stage),
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            current_stage: Some(JobStage::Completed),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress.min(100);
        }
        if let Some(stage) = self.current_stage {
            job.current_stage = Some(stage);
        }
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
        job.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// Job 台账
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, StoreError>;

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// 尚未进入终态的 Job（重启后对账用）
    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError>;
}

/// 台账变更通知
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: Option<JobStage>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            stage: job.current_stage,
        }
    }
}

/// 内存版台账
pub struct InMemoryJobLedger {
    jobs: RwLock<HashMap<JobId, Job>>,
    /// 用户 -> Job 索引
    user_jobs: RwLock<HashMap<String, Vec<JobId>>>,
    event_tx: mpsc::UnboundedSender<JobEvent>,
}

impl InMemoryJobLedger {
    /// 创建台账，同时返回变更通知接收端（不关心可直接丢弃）
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                jobs: RwLock::new(HashMap::new()),
                user_jobs: RwLock::new(HashMap::new()),
                event_tx,
            },
            event_rx,
        )
    }

    /// 用户的全部 Job
    pub async fn get_user_jobs(&self, user_id: &str) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let user_jobs = self.user_jobs.read().await;
        user_jobs
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| jobs.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobLedger for InMemoryJobLedger {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        self.user_jobs
            .write()
            .await
            .entry(job.user_id.clone())
            .or_default()
            .push(job.id.clone());
        jobs.insert(job.id.clone(), job.clone());
        let _ = self.event_tx.send(JobEvent::from(&job));
        Ok(job)
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        update.apply(job);
        let _ = self.event_tx.send(JobEvent::from(&*job));
        Ok(job.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_finished())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_ledger_lifecycle() {
        let (ledger, mut events) = InMemoryJobLedger::new();
        let job = ledger.create(Job::new("u1", "c1", "Rust")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        ledger
            .update(
                &job.id,
                JobUpdate::stage(JobStage::SkillExpansion, 10).with_status(JobStatus::Processing),
            )
            .await
            .unwrap();
        let done = ledger
            .update(&job.id, JobUpdate::completed(json!({"ok": true})))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.current_stage, Some(JobStage::Completed));

        let progress: Vec<u8> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress, vec![0, 10, 100]);
        assert_eq!(ledger.get_user_jobs("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_progress() {
        let (ledger, _events) = InMemoryJobLedger::new();
        let job = ledger.create(Job::new("u1", "c1", "Rust")).await.unwrap();
        ledger
            .update(&job.id, JobUpdate::stage(JobStage::SkillBreakdown, 50))
            .await
            .unwrap();
        let failed = ledger.update(&job.id, JobUpdate::failed("boom")).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 50);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(ledger.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let (ledger, _events) = InMemoryJobLedger::new();
        let result = ledger.update("missing", JobUpdate::failed("x")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_stage_serializes_kebab_case() {
        let value = serde_json::to_value(JobStage::CompetencyIdentification).unwrap();
        assert_eq!(value, json!("competency-identification"));
        assert_eq!(JobStage::parse("path-creation"), Some(JobStage::PathCreation));
    }
}
