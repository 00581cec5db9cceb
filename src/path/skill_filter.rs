//! 技能过滤：用最新的剩余技能名裁剪技能拆解
//!
//! 匹配规则：小写后任一方向的子串包含即保留。宽松匹配，
//! 缺口记录与最新数据之间的技能命名并不稳定。

use crate::path::model::{SkillBreakdown, SkillBreakdownMap};

/// 过滤技能拆解；micro 与 nano 都被清空的能力直接移除
pub fn filter_breakdown<S: AsRef<str>>(
    breakdown: &SkillBreakdownMap,
    remaining_skill_names: &[S],
) -> SkillBreakdownMap {
    let remaining: Vec<String> = remaining_skill_names
        .iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    breakdown
        .iter()
        .filter_map(|(competency, skills)| {
            let filtered = SkillBreakdown {
                micro_skills: keep_matching(&skills.micro_skills, &remaining),
                nano_skills: keep_matching(&skills.nano_skills, &remaining),
            };
            (!filtered.is_empty()).then(|| (competency.clone(), filtered))
        })
        .collect()
}

fn keep_matching(skills: &[String], remaining: &[String]) -> Vec<String> {
    skills
        .iter()
        .filter(|skill| matches_any(skill, remaining))
        .cloned()
        .collect()
}

/// 双向子串匹配（remaining 已小写）
pub fn matches_any(skill: &str, remaining: &[String]) -> bool {
    let skill = skill.trim().to_lowercase();
    if skill.is_empty() {
        return false;
    }
    remaining
        .iter()
        .any(|r| skill.contains(r.as_str()) || r.contains(skill.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SkillBreakdownMap {
        let mut map = SkillBreakdownMap::new();
        map.insert(
            "Front End Dev".to_string(),
            SkillBreakdown {
                micro_skills: vec!["Hooks".into(), "Grid".into()],
                nano_skills: vec!["Async".into()],
            },
        );
        map
    }

    #[test]
    fn test_keeps_only_matching_skills() {
        let filtered = filter_breakdown(&sample(), &["Hooks"]);
        let entry = filtered.get("Front End Dev").unwrap();
        assert_eq!(entry.micro_skills, vec!["Hooks"]);
        assert!(entry.nano_skills.is_empty());
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_drops_competency_without_survivors() {
        let filtered = filter_breakdown(&sample(), &["Unrelated"]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_substring_match_in_both_directions() {
        // "react hooks" 包含 "hooks"；"grid" 被 "css grid layout" 包含
        let filtered = filter_breakdown(&sample(), &["react HOOKS", "css grid layout"]);
        let entry = filtered.get("Front End Dev").unwrap();
        assert_eq!(entry.micro_skills, vec!["Hooks", "Grid"]);
    }

    #[test]
    fn test_blank_remaining_names_match_nothing() {
        assert!(filter_breakdown(&sample(), &["  "]).is_empty());
    }
}
