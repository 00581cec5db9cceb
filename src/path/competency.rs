//! 能力提取：把第 1 / 2 阶段的 AI 输出（多种历史格式）统一为 CompetencyRecord 列表
//!
//! 已知格式：
//! - `{"expanded_competencies_list": [...]}`（技能扩展阶段）
//! - `{"competencies": [...]}` / `{"competencies_with_core_skills": [...]}`（能力识别阶段）
//! - 顶层数组
//!
//! 列表项可以是字符串，也可以是带 competency_name / name 的对象。

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::path::model::CompetencyRecord;

const EXPANDED_KEYS: &[&str] = &["expanded_competencies_list", "expandedCompetenciesList"];
const IDENTIFIED_KEYS: &[&str] = &[
    "competencies",
    "competencies_with_core_skills",
    "competenciesWithCoreSkills",
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCompetency {
    Name(String),
    Detailed(DetailedCompetency),
}

#[derive(Debug, Deserialize)]
struct DetailedCompetency {
    #[serde(alias = "competency_name", alias = "competencyName", alias = "competency")]
    name: String,
    #[serde(default, alias = "targetLevel")]
    target_level: Option<String>,
    #[serde(default, alias = "queryTemplate", alias = "mgs_query_template")]
    query_template: Option<String>,
    #[serde(default, alias = "exampleQuery")]
    example_query: Option<String>,
}

/// 已识别的输出格式
#[derive(Debug)]
pub enum CompetencyShape<'a> {
    Expanded(&'a [Value]),
    Identified(&'a [Value]),
    Bare(&'a [Value]),
    Unrecognized,
}

/// 判定能力输出格式
pub fn detect_competency_shape(value: &Value) -> CompetencyShape<'_> {
    let list_under = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
    };
    if let Some(items) = list_under(EXPANDED_KEYS) {
        return CompetencyShape::Expanded(items);
    }
    if let Some(items) = list_under(IDENTIFIED_KEYS) {
        return CompetencyShape::Identified(items);
    }
    match value {
        Value::Array(items) => CompetencyShape::Bare(items),
        _ => CompetencyShape::Unrecognized,
    }
}

/// AI 输出 -> 能力列表（按名称大小写不敏感去重，保持首次出现顺序）
pub fn extract_competencies(output: &Value) -> Vec<CompetencyRecord> {
    let items = match detect_competency_shape(output) {
        CompetencyShape::Expanded(items)
        | CompetencyShape::Identified(items)
        | CompetencyShape::Bare(items) => items,
        CompetencyShape::Unrecognized => {
            tracing::debug!("competency output has no recognizable list");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<RawCompetency>(item.clone()) {
            Ok(raw) => Some(to_record(raw)),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable competency entry");
                None
            }
        })
        .filter(|record| !record.name.is_empty())
        .filter(|record| seen.insert(record.name.to_lowercase()))
        .collect()
}

fn to_record(raw: RawCompetency) -> CompetencyRecord {
    match raw {
        RawCompetency::Name(name) => CompetencyRecord::named(name.trim()),
        RawCompetency::Detailed(d) => CompetencyRecord {
            name: d.name.trim().to_string(),
            target_level: d.target_level,
            query_template: d.query_template,
            example_query: d.example_query,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expanded_shape() {
        let out = json!({"expanded_competencies_list": [
            {"competency_name": "React"},
            {"competency_name": "CSS Layout", "target_level": "intermediate"}
        ]});
        assert!(matches!(detect_competency_shape(&out), CompetencyShape::Expanded(_)));
        let records = extract_competencies(&out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].target_level.as_deref(), Some("intermediate"));
    }

    #[test]
    fn test_identified_shape_with_query_fields() {
        let out = json!({"competencies": [
            {"name": "React", "mgs_query_template": "skills for {x}", "exampleQuery": "skills for react"},
            "Testing"
        ]});
        let records = extract_competencies(&out);
        assert_eq!(records[0].query_template.as_deref(), Some("skills for {x}"));
        assert_eq!(records[0].example_query.as_deref(), Some("skills for react"));
        assert_eq!(records[1], CompetencyRecord::named("Testing"));
    }

    #[test]
    fn test_bare_list_dedupes_case_insensitively() {
        let out = json!(["React", " react ", {"competency": "Redux"}, 42, ""]);
        let names: Vec<String> = extract_competencies(&out).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["React", "Redux"]);
    }

    #[test]
    fn test_unrecognized_shape_yields_nothing() {
        assert!(extract_competencies(&json!({"other": []})).is_empty());
        assert!(extract_competencies(&json!("plain text")).is_empty());
    }
}
