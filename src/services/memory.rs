//! 协作方的内存实现（测试与演示用）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ApprovalPolicy, ApprovalRecord, ApprovalRequest, ApprovalRequester, Company, ExamStatus,
    ExpansionRecord, ExpansionStore, ExpansionUpdate, GapRecord, LearningPathRecord,
    LearningPathStore, Notifier, PolicyDecision, SkillsGapStore,
};
use crate::core::StoreError;

#[derive(Default)]
pub struct InMemoryLearningPathStore {
    paths: RwLock<HashMap<String, LearningPathRecord>>,
}

impl InMemoryLearningPathStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.paths.read().await.len()
    }
}

#[async_trait]
impl LearningPathStore for InMemoryLearningPathStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<LearningPathRecord>, StoreError> {
        Ok(self.paths.read().await.get(id).cloned())
    }

    async fn save(&self, mut record: LearningPathRecord) -> Result<LearningPathRecord, StoreError> {
        let mut paths = self.paths.write().await;
        // 覆盖保存时保留首次创建时间
        if let Some(existing) = paths.get(&record.id) {
            record.created_at = existing.created_at;
        }
        record.updated_at = chrono::Utc::now().timestamp_millis();
        paths.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

#[derive(Default)]
pub struct InMemorySkillsGapStore {
    records: RwLock<Vec<GapRecord>>,
}

impl InMemorySkillsGapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一用户 + 目标能力的记录会被替换
    pub async fn upsert(&self, record: GapRecord) {
        let mut records = self.records.write().await;
        records.retain(|r| {
            !(r.user_id == record.user_id
                && r.competency_target_name == record.competency_target_name)
        });
        records.push(record);
    }

    pub async fn set_exam_status(
        &self,
        user_id: &str,
        competency_target_name: &str,
        status: ExamStatus,
    ) {
        let mut records = self.records.write().await;
        for r in records.iter_mut().filter(|r| {
            r.user_id == user_id && r.competency_target_name == competency_target_name
        }) {
            r.exam_status = Some(status);
        }
    }
}

#[async_trait]
impl SkillsGapStore for InMemorySkillsGapStore {
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<GapRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryExpansionStore {
    /// 按创建顺序保存
    records: RwLock<Vec<ExpansionRecord>>,
}

impl InMemoryExpansionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ExpansionStore for InMemoryExpansionStore {
    async fn get_latest_by_user_and_gap(
        &self,
        user_id: &str,
        gap_id: &str,
    ) -> Result<Option<ExpansionRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.user_id == user_id && r.gap_id == gap_id)
            .cloned())
    }

    async fn create(&self, record: ExpansionRecord) -> Result<ExpansionRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.expansion_id == record.expansion_id) {
            return Err(StoreError::Conflict(format!(
                "expansion {} already exists",
                record.expansion_id
            )));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        expansion_id: &str,
        update: ExpansionUpdate,
    ) -> Result<ExpansionRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.expansion_id == expansion_id)
            .ok_or_else(|| StoreError::NotFound(format!("expansion {expansion_id}")))?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn get_by_id(&self, expansion_id: &str) -> Result<Option<ExpansionRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.expansion_id == expansion_id)
            .cloned())
    }
}

/// 固定的公司审批策略；未登记的公司不需要审批
#[derive(Default)]
pub struct StaticApprovalPolicy {
    decisions: HashMap<String, PolicyDecision>,
}

impl StaticApprovalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company: Company, requires_approval: bool) -> Self {
        self.decisions.insert(
            company.company_id.clone(),
            PolicyDecision {
                requires_approval,
                company,
            },
        );
        self
    }
}

#[async_trait]
impl ApprovalPolicy for StaticApprovalPolicy {
    async fn check(&self, company_id: &str) -> Result<PolicyDecision, StoreError> {
        Ok(self
            .decisions
            .get(company_id)
            .cloned()
            .unwrap_or_else(|| PolicyDecision {
                requires_approval: false,
                company: Company {
                    company_id: company_id.to_string(),
                    name: company_id.to_string(),
                    decision_maker: None,
                },
            }))
    }
}

/// 只写日志的通知器
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, approval: &ApprovalRecord) -> Result<(), StoreError> {
        tracing::info!(
            approval_id = %approval.approval_id,
            learning_path_id = %approval.learning_path_id,
            decision_maker = approval.decision_maker.as_ref().map(|d| d.name.as_str()).unwrap_or("-"),
            "approval requested"
        );
        Ok(())
    }
}

/// 内存审批请求记录；创建后调用通知器，通知失败只记日志
pub struct InMemoryApprovalRequester {
    records: RwLock<Vec<ApprovalRecord>>,
    notifier: Arc<dyn Notifier>,
}

impl InMemoryApprovalRequester {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            notifier,
        }
    }

    pub async fn records(&self) -> Vec<ApprovalRecord> {
        self.records.read().await.clone()
    }
}

impl Default for InMemoryApprovalRequester {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

#[async_trait]
impl ApprovalRequester for InMemoryApprovalRequester {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalRecord, StoreError> {
        let record = ApprovalRecord::pending(&request);
        self.records.write().await.push(record.clone());
        if let Err(e) = self.notifier.notify(&record).await {
            tracing::warn!(
                approval_id = %record.approval_id,
                error = %e,
                "approval notification failed"
            );
        }
        Ok(record)
    }
}
