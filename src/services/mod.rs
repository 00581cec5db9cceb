//! 外部协作方契约：学习路径 / 技能缺口 / 扩展缓存仓储、审批策略与审批请求、技能分类服务
//!
//! 编排器只依赖这里的 trait；内存实现见 [`memory`]，HTTP 分类服务见 [`taxonomy`]。

pub mod memory;
pub mod taxonomy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::StoreError;
use crate::path::{CanonicalLearningPath, CompetencyRecord, RawSkillData, SkillBreakdownMap};

pub use memory::{
    InMemoryApprovalRequester, InMemoryExpansionStore, InMemoryLearningPathStore,
    InMemorySkillsGapStore, LogNotifier, StaticApprovalPolicy,
};
pub use taxonomy::{fallback_breakdown, HttpTaxonomyClient, TaxonomyError};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 测评状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    NotTaken,
    Pending,
    Passed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ExamStatus {
    /// 是否为「测评未通过」标记
    pub fn is_failure(self) -> bool {
        matches!(self, ExamStatus::Failed)
    }
}

/// 技能缺口仓储中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapRecord {
    pub gap_id: String,
    pub user_id: String,
    pub competency_target_name: String,
    #[serde(default)]
    pub raw_skill_data: RawSkillData,
    #[serde(default)]
    pub exam_status: Option<ExamStatus>,
}

/// 前两个 AI 阶段输出的缓存，供更新模式复用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionRecord {
    pub expansion_id: String,
    pub gap_id: String,
    pub user_id: String,
    pub stage1_output: Option<Value>,
    pub stage2_output: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ExpansionRecord {
    pub fn new(gap_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            expansion_id: format!("exp_{}", uuid::Uuid::new_v4()),
            gap_id: gap_id.into(),
            user_id: user_id.into(),
            stage1_output: None,
            stage2_output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 两个阶段输出都已写入
    pub fn is_complete(&self) -> bool {
        self.stage1_output.is_some() && self.stage2_output.is_some()
    }
}

/// 扩展缓存局部更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionUpdate {
    pub stage1_output: Option<Value>,
    pub stage2_output: Option<Value>,
}

impl ExpansionUpdate {
    pub fn stage1(output: Value) -> Self {
        Self {
            stage1_output: Some(output),
            ..Self::default()
        }
    }

    pub fn stage2(output: Value) -> Self {
        Self {
            stage2_output: Some(output),
            ..Self::default()
        }
    }

    pub fn apply(&self, record: &mut ExpansionRecord) {
        if let Some(v) = &self.stage1_output {
            record.stage1_output = Some(v.clone());
        }
        if let Some(v) = &self.stage2_output {
            record.stage2_output = Some(v.clone());
        }
        record.updated_at = now_millis();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    Pending,
    Approved,
}

/// 持久化的学习路径；id 即 competencyTargetName
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPathRecord {
    pub id: String,
    pub user_id: String,
    pub company_id: String,
    pub path: CanonicalLearningPath,
    pub status: PathStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LearningPathRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        company_id: impl Into<String>,
        path: CanonicalLearningPath,
        status: PathStatus,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            company_id: company_id.into(),
            path,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionMaker {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub company_id: String,
    pub name: String,
    #[serde(default)]
    pub decision_maker: Option<DecisionMaker>,
}

/// 审批策略查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub requires_approval: bool,
    pub company: Company,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub learning_path_id: String,
    pub company_id: String,
    pub decision_maker: Option<DecisionMaker>,
    /// 序列化后的规范化路径
    pub learning_path: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub learning_path_id: String,
    pub company_id: String,
    pub decision_maker: Option<DecisionMaker>,
    pub status: String,
    pub created_at: i64,
}

impl ApprovalRecord {
    pub fn pending(request: &ApprovalRequest) -> Self {
        Self {
            approval_id: format!("apr_{}", uuid::Uuid::new_v4()),
            learning_path_id: request.learning_path_id.clone(),
            company_id: request.company_id.clone(),
            decision_maker: request.decision_maker.clone(),
            status: "pending".to_string(),
            created_at: now_millis(),
        }
    }
}

/// 技能拆解调用参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakdownOptions {
    pub max_retries: u32,
    /// 强制使用确定性回退数据
    pub use_fallback: bool,
    pub include_expansions: bool,
}

impl Default for BreakdownOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            use_fallback: false,
            include_expansions: true,
        }
    }
}

#[async_trait]
pub trait LearningPathStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<LearningPathRecord>, StoreError>;

    async fn save(&self, record: LearningPathRecord) -> Result<LearningPathRecord, StoreError>;
}

#[async_trait]
pub trait SkillsGapStore: Send + Sync {
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<GapRecord>, StoreError>;
}

#[async_trait]
pub trait ExpansionStore: Send + Sync {
    async fn get_latest_by_user_and_gap(
        &self,
        user_id: &str,
        gap_id: &str,
    ) -> Result<Option<ExpansionRecord>, StoreError>;

    async fn create(&self, record: ExpansionRecord) -> Result<ExpansionRecord, StoreError>;

    async fn update(
        &self,
        expansion_id: &str,
        update: ExpansionUpdate,
    ) -> Result<ExpansionRecord, StoreError>;

    async fn get_by_id(&self, expansion_id: &str) -> Result<Option<ExpansionRecord>, StoreError>;
}

#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn check(&self, company_id: &str) -> Result<PolicyDecision, StoreError>;
}

/// 创建审批请求；通知失败不影响请求本身
#[async_trait]
pub trait ApprovalRequester: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalRecord, StoreError>;
}

/// 审批通知（邮件等投递方式在此之外）
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, approval: &ApprovalRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SkillsTaxonomy: Send + Sync {
    async fn breakdown(
        &self,
        competencies: &[CompetencyRecord],
        options: &BreakdownOptions,
    ) -> Result<SkillBreakdownMap, TaxonomyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exam_status_failure_marker() {
        let s: ExamStatus = serde_json::from_value(json!("failed")).unwrap();
        assert!(s.is_failure());
        let s: ExamStatus = serde_json::from_value(json!("something_new")).unwrap();
        assert_eq!(s, ExamStatus::Unknown);
        assert!(!ExamStatus::Passed.is_failure());
    }

    #[test]
    fn test_expansion_update_merges_fields() {
        let mut record = ExpansionRecord::new("gap-1", "u1");
        assert!(!record.is_complete());
        ExpansionUpdate::stage1(json!({"a": 1})).apply(&mut record);
        ExpansionUpdate::stage2(json!({"b": 2})).apply(&mut record);
        assert!(record.is_complete());
        assert_eq!(record.stage1_output, Some(json!({"a": 1})));
    }

    #[test]
    fn test_gap_record_reads_camel_case() {
        let record: GapRecord = serde_json::from_value(json!({
            "gapId": "g1",
            "userId": "u1",
            "competencyTargetName": "Frontend",
            "rawSkillData": {"microSkills": ["Hooks"], "nano_skills": ["Async"]},
            "examStatus": "failed"
        }))
        .unwrap();
        assert_eq!(record.raw_skill_data.skill_names(), vec!["Hooks", "Async"]);
        assert_eq!(record.exam_status, Some(ExamStatus::Failed));
    }
}
