//! 领域数据模型：技能缺口、能力项、技能拆解、规范化学习路径
//!
//! 规范化学习路径的字段顺序即序列化顺序（serde 按字段声明顺序输出），
//! 下游部分集成按位置匹配字段，因此调整字段顺序属于破坏性变更。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 学习者的技能缺口（生成请求的不可变输入）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsGap {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub competency_target_name: String,
    #[serde(default)]
    pub micro_skills: Vec<String>,
    #[serde(default)]
    pub nano_skills: Vec<String>,
}

impl SkillsGap {
    pub fn new(
        user_id: impl Into<String>,
        company_id: impl Into<String>,
        competency_target_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            company_id: company_id.into(),
            competency_target_name: competency_target_name.into(),
            micro_skills: Vec::new(),
            nano_skills: Vec::new(),
        }
    }

    pub fn with_micro_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.micro_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_nano_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nano_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    /// 缺失（为空或仅空白）的必填字段名
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("userId", &self.user_id),
            ("companyId", &self.company_id),
            ("competencyTargetName", &self.competency_target_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// 上游系统维护的原始技能数据（可能在请求发出后被更新）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSkillData {
    #[serde(default, alias = "micro_skills")]
    pub micro_skills: Vec<String>,
    #[serde(default, alias = "nano_skills")]
    pub nano_skills: Vec<String>,
}

impl RawSkillData {
    /// micro + nano 全部技能名
    pub fn skill_names(&self) -> Vec<String> {
        self.micro_skills
            .iter()
            .chain(self.nano_skills.iter())
            .cloned()
            .collect()
    }
}

impl From<&SkillsGap> for RawSkillData {
    fn from(gap: &SkillsGap) -> Self {
        Self {
            micro_skills: gap.micro_skills.clone(),
            nano_skills: gap.nano_skills.clone(),
        }
    }
}

/// 规范化能力项：无论 AI 输出是哪种历史格式，提取后都是这一形态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_query: Option<String>,
}

impl CompetencyRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_level: None,
            query_template: None,
            example_query: None,
        }
    }
}

/// 单个能力下的 micro / nano 技能
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillBreakdown {
    #[serde(default, alias = "micro_skills")]
    pub micro_skills: Vec<String>,
    #[serde(default, alias = "nano_skills")]
    pub nano_skills: Vec<String>,
}

impl SkillBreakdown {
    pub fn is_empty(&self) -> bool {
        self.micro_skills.is_empty() && self.nano_skills.is_empty()
    }
}

/// 能力名 -> 技能拆解
pub type SkillBreakdownMap = BTreeMap<String, SkillBreakdown>;

/// 规范化学习路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalLearningPath {
    pub path_title: String,
    pub learner_id: String,
    pub total_estimated_duration_hours: f64,
    pub learning_modules: Vec<LearningModule>,
}

/// 学习模块；skillsInModule 为空时不输出，steps 缺失时不输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningModule {
    pub module_order: i64,
    pub module_title: String,
    pub estimated_duration_hours: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills_in_module: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<LearningStep>>,
}

impl LearningModule {
    pub fn steps(&self) -> &[LearningStep] {
        self.steps.as_deref().unwrap_or(&[])
    }

    /// 用于难度评估的技能：优先 skillsInModule，为空时取各步骤覆盖的技能
    pub fn difficulty_skills(&self) -> Vec<&str> {
        if !self.skills_in_module.is_empty() {
            return self.skills_in_module.iter().map(String::as_str).collect();
        }
        self.steps()
            .iter()
            .flat_map(|s| s.skills_covered.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStep {
    pub step: i64,
    pub title: String,
    pub description: String,
    pub estimated_time: String,
    pub skills_covered: Vec<String>,
}

/// 单次校验结果（不单独持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_reports_blank_values() {
        let gap = SkillsGap::new("u1", "  ", "");
        assert_eq!(gap.missing_fields(), vec!["companyId", "competencyTargetName"]);
        assert!(SkillsGap::new("u1", "c1", "Rust").missing_fields().is_empty());
    }

    #[test]
    fn test_skills_gap_deserializes_camel_case() {
        let gap: SkillsGap = serde_json::from_str(
            r#"{"userId":"u1","companyId":"c1","competencyTargetName":"Rust","microSkills":["Ownership"]}"#,
        )
        .unwrap();
        assert_eq!(gap.micro_skills, vec!["Ownership"]);
        assert!(gap.nano_skills.is_empty());
    }

    #[test]
    fn test_module_difficulty_skills_falls_back_to_steps() {
        let module = LearningModule {
            module_order: 1,
            module_title: "Basics".into(),
            estimated_duration_hours: 2.0,
            skills_in_module: vec![],
            steps: Some(vec![LearningStep {
                step: 1,
                title: "Intro".into(),
                description: String::new(),
                estimated_time: "1h".into(),
                skills_covered: vec!["Syntax".into()],
            }]),
        };
        assert_eq!(module.difficulty_skills(), vec!["Syntax"]);
    }
}
