//! 审批决策与交接
//!
//! 决策在持久化路径之前做出（决定路径状态），交接在 Job 标记 completed 之后执行。

use crate::core::{PipelineError, StoreError};
use crate::services::{
    ApprovalPolicy, ApprovalRecord, ApprovalRequest, ApprovalRequester, Company, ExamStatus,
    LearningPathRecord, PathStatus,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    /// 已有路径且测评未通过：跳过策略检查，直接批准，不分发
    UpdateAfterFailedAssessment,
    /// 公司要求人工审批
    RequiresApproval { company: Company },
    /// 公司不要求审批
    AutoApproved,
}

impl ApprovalDecision {
    pub async fn decide(
        policy: &dyn ApprovalPolicy,
        company_id: &str,
        has_existing_path: bool,
        exam_status: Option<ExamStatus>,
    ) -> Result<Self, StoreError> {
        if has_existing_path && exam_status.is_some_and(ExamStatus::is_failure) {
            return Ok(Self::UpdateAfterFailedAssessment);
        }
        let decision = policy.check(company_id).await?;
        Ok(if decision.requires_approval {
            Self::RequiresApproval {
                company: decision.company,
            }
        } else {
            Self::AutoApproved
        })
    }

    pub fn path_status(&self) -> PathStatus {
        match self {
            Self::RequiresApproval { .. } => PathStatus::Pending,
            Self::UpdateAfterFailedAssessment | Self::AutoApproved => PathStatus::Approved,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateAfterFailedAssessment => "update-after-failed-assessment",
            Self::RequiresApproval { .. } => "requires-approval",
            Self::AutoApproved => "auto-approved",
        }
    }

    /// 需要审批时创建审批请求；其余情况无事可做（不做推送分发）
    pub async fn hand_off(
        &self,
        requester: &dyn ApprovalRequester,
        record: &LearningPathRecord,
    ) -> Result<Option<ApprovalRecord>, PipelineError> {
        let Self::RequiresApproval { company } = self else {
            return Ok(None);
        };
        let request = ApprovalRequest {
            learning_path_id: record.id.clone(),
            company_id: company.company_id.clone(),
            decision_maker: company.decision_maker.clone(),
            learning_path: serde_json::to_value(&record.path)?,
        };
        Ok(Some(requester.request(request).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::CanonicalLearningPath;
    use crate::services::{DecisionMaker, InMemoryApprovalRequester, StaticApprovalPolicy};

    fn acme(requires: bool) -> StaticApprovalPolicy {
        StaticApprovalPolicy::new().with_company(
            Company {
                company_id: "c1".into(),
                name: "Acme".into(),
                decision_maker: Some(DecisionMaker {
                    id: "dm1".into(),
                    name: "Dana".into(),
                    email: None,
                }),
            },
            requires,
        )
    }

    fn record() -> LearningPathRecord {
        LearningPathRecord::new(
            "Frontend",
            "u1",
            "c1",
            CanonicalLearningPath {
                path_title: "Frontend".into(),
                learner_id: "u1".into(),
                total_estimated_duration_hours: 0.0,
                learning_modules: vec![],
            },
            PathStatus::Pending,
        )
    }

    #[tokio::test]
    async fn test_failed_assessment_update_skips_policy() {
        let d = ApprovalDecision::decide(&acme(true), "c1", true, Some(ExamStatus::Failed))
            .await
            .unwrap();
        assert_eq!(d, ApprovalDecision::UpdateAfterFailedAssessment);
        assert_eq!(d.path_status(), PathStatus::Approved);

        // 没有旧路径时仍走策略
        let d = ApprovalDecision::decide(&acme(true), "c1", false, Some(ExamStatus::Failed))
            .await
            .unwrap();
        assert_eq!(d.path_status(), PathStatus::Pending);
    }

    #[tokio::test]
    async fn test_hand_off_creates_request_with_decision_maker() {
        let requester = InMemoryApprovalRequester::default();
        let d = ApprovalDecision::decide(&acme(true), "c1", false, None).await.unwrap();
        let approval = d.hand_off(&requester, &record()).await.unwrap().unwrap();
        assert_eq!(approval.learning_path_id, "Frontend");
        assert_eq!(approval.decision_maker.unwrap().name, "Dana");

        let d = ApprovalDecision::decide(&acme(false), "c1", false, None).await.unwrap();
        assert_eq!(d, ApprovalDecision::AutoApproved);
        assert!(d.hand_off(&requester, &record()).await.unwrap().is_none());
        assert_eq!(requester.records().await.len(), 1);
    }
}
