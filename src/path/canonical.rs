//! 学习路径规范化：把第 4 阶段的 AI 输出重建为 CanonicalLearningPath
//!
//! 先由 detect_path_shape 判定输出属于哪种格式（现代：含 learning_modules；旧版：步骤列表），
//! 再交给对应的提取函数。现代格式逐个重建模块与步骤，字段顺序由模型结构体的声明顺序保证。

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::CompletionOutput;
use crate::path::model::{CanonicalLearningPath, LearningModule, LearningStep};

/// 包裹整条路径的外层键（值为对象时才展开）
const ENVELOPE_KEYS: &[&str] = &["learning_path", "learningPath"];
/// 现代格式的标志键
const MODULE_KEYS: &[&str] = &["learning_modules", "learningModules"];
/// 旧版格式中步骤列表可能所在的键
const STEP_LIST_KEYS: &[&str] = &["steps", "learning_path", "learningPath", "path"];
const TITLE_KEYS: &[&str] = &["path_title", "pathTitle", "title"];

#[derive(Error, Debug)]
pub enum CanonicalizeError {
    #[error("output is not JSON: {0}")]
    NotJson(String),

    #[error("unrecognized learning path shape: {0}")]
    UnrecognizedShape(String),

    #[error("malformed learning path: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// 规范化时需要的外部信息
#[derive(Debug, Clone, Copy)]
pub struct CanonicalizeContext<'a> {
    /// 学习者 id，总是覆盖 AI 输出中的值
    pub learner_id: &'a str,
    /// AI 未给出标题时使用
    pub fallback_title: &'a str,
}

/// 技能既可能是字符串，也可能是 {"name": ...}
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SkillName {
    Plain(String),
    Named {
        #[serde(alias = "skill_name", alias = "skillName")]
        name: String,
    },
}

impl SkillName {
    fn into_name(self) -> String {
        match self {
            Self::Plain(name) | Self::Named { name } => name.trim().to_string(),
        }
    }
}

/// null 与缺失键同等对待
fn skill_names(raw: Option<Vec<SkillName>>) -> Vec<String> {
    raw.unwrap_or_default()
        .into_iter()
        .map(SkillName::into_name)
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ModernPath {
    #[serde(default, alias = "pathTitle")]
    path_title: Option<String>,
    #[serde(default, alias = "totalEstimatedDurationHours")]
    total_estimated_duration_hours: Option<Value>,
    #[serde(alias = "learningModules")]
    learning_modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(default, alias = "moduleOrder")]
    module_order: Option<Value>,
    #[serde(default, alias = "moduleTitle")]
    module_title: Option<String>,
    #[serde(default, alias = "estimatedDurationHours")]
    estimated_duration_hours: Option<Value>,
    #[serde(default, alias = "skillsInModule")]
    skills_in_module: Option<Vec<SkillName>>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    step: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "estimatedTime")]
    estimated_time: Option<Value>,
    #[serde(default, alias = "skillsCovered")]
    skills_covered: Option<Vec<SkillName>>,
}

/// 旧版步骤：纯标题字符串或松散对象
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyEntry {
    Title(String),
    Step(LegacyStep),
}

#[derive(Debug, Deserialize)]
struct LegacyStep {
    #[serde(default, alias = "name", alias = "step_title")]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "estimatedTime", alias = "duration")]
    estimated_time: Option<Value>,
    #[serde(default, alias = "skills", alias = "skillsCovered")]
    skills_covered: Option<Vec<SkillName>>,
}

#[derive(Debug)]
pub struct LegacyPath {
    title: Option<String>,
    steps: Vec<LegacyEntry>,
}

/// 已识别的输出格式
#[derive(Debug)]
pub enum PathShape {
    Modern(ModernPath),
    Legacy(LegacyPath),
}

/// 判定 AI 输出格式
pub fn detect_path_shape(value: &Value) -> Result<PathShape, CanonicalizeError> {
    let root = unwrap_envelope(value);
    match root {
        Value::Object(map) if MODULE_KEYS.iter().any(|k| map.contains_key(*k)) => {
            Ok(PathShape::Modern(serde_json::from_value(root.clone())?))
        }
        Value::Object(map) => {
            let items = STEP_LIST_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
                .ok_or_else(|| {
                    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                    CanonicalizeError::UnrecognizedShape(format!("object keys [{}]", keys.join(", ")))
                })?;
            let title = TITLE_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string);
            Ok(PathShape::Legacy(LegacyPath {
                title,
                steps: serde_json::from_value(Value::Array(items.clone()))?,
            }))
        }
        Value::Array(items) => Ok(PathShape::Legacy(LegacyPath {
            title: None,
            steps: serde_json::from_value(Value::Array(items.clone()))?,
        })),
        other => Err(CanonicalizeError::UnrecognizedShape(format!(
            "top-level {}",
            json_type(other)
        ))),
    }
}

fn unwrap_envelope(value: &Value) -> &Value {
    ENVELOPE_KEYS
        .iter()
        .find_map(|k| value.get(*k).filter(|inner| inner.is_object()))
        .unwrap_or(value)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// AI 输出 -> 规范化路径
pub fn canonicalize_path(
    output: &CompletionOutput,
    ctx: &CanonicalizeContext<'_>,
) -> Result<CanonicalLearningPath, CanonicalizeError> {
    let value = output
        .to_json()
        .map_err(|e| CanonicalizeError::NotJson(e.to_string()))?;
    canonicalize_value(&value, ctx)
}

pub fn canonicalize_value(
    value: &Value,
    ctx: &CanonicalizeContext<'_>,
) -> Result<CanonicalLearningPath, CanonicalizeError> {
    Ok(match detect_path_shape(value)? {
        PathShape::Modern(path) => canonicalize_modern(path, ctx),
        PathShape::Legacy(path) => canonicalize_legacy(path, ctx),
    })
}

fn canonicalize_modern(path: ModernPath, ctx: &CanonicalizeContext<'_>) -> CanonicalLearningPath {
    let learning_modules: Vec<LearningModule> = path
        .learning_modules
        .into_iter()
        .enumerate()
        .map(|(index, module)| canonical_module(index, module))
        .collect();

    let total_estimated_duration_hours = path
        .total_estimated_duration_hours
        .as_ref()
        .and_then(number_of)
        .unwrap_or_else(|| learning_modules.iter().map(|m| m.estimated_duration_hours).sum());

    CanonicalLearningPath {
        path_title: non_blank(path.path_title).unwrap_or_else(|| ctx.fallback_title.to_string()),
        learner_id: ctx.learner_id.to_string(),
        total_estimated_duration_hours,
        learning_modules,
    }
}

fn canonical_module(index: usize, module: RawModule) -> LearningModule {
    let steps: Option<Vec<LearningStep>> = module.steps.map(|steps| {
        steps
            .into_iter()
            .enumerate()
            .map(|(j, step)| canonical_step(j, step))
            .collect()
    });

    let estimated_duration_hours = module
        .estimated_duration_hours
        .as_ref()
        .and_then(number_of)
        .unwrap_or_else(|| steps.as_deref().map(sum_step_hours).unwrap_or(0.0));

    LearningModule {
        // 缺失时按位置补齐；显式给出的错误序号原样保留，交给校验器
        module_order: module
            .module_order
            .as_ref()
            .and_then(integer_of)
            .unwrap_or(index as i64 + 1),
        module_title: non_blank(module.module_title)
            .unwrap_or_else(|| format!("Module {}", index + 1)),
        estimated_duration_hours,
        skills_in_module: skill_names(module.skills_in_module),
        steps,
    }
}

fn canonical_step(index: usize, step: RawStep) -> LearningStep {
    LearningStep {
        step: step.step.as_ref().and_then(integer_of).unwrap_or(index as i64 + 1),
        title: non_blank(step.title).unwrap_or_else(|| format!("Step {}", index + 1)),
        description: step.description.unwrap_or_default(),
        estimated_time: step.estimated_time.as_ref().map(time_text).unwrap_or_default(),
        skills_covered: skill_names(step.skills_covered),
    }
}

fn canonicalize_legacy(path: LegacyPath, ctx: &CanonicalizeContext<'_>) -> CanonicalLearningPath {
    let steps: Vec<LearningStep> = path
        .steps
        .into_iter()
        .enumerate()
        .map(|(j, entry)| match entry {
            LegacyEntry::Title(title) => LearningStep {
                step: j as i64 + 1,
                title,
                description: String::new(),
                estimated_time: String::new(),
                skills_covered: Vec::new(),
            },
            LegacyEntry::Step(step) => LearningStep {
                step: j as i64 + 1,
                title: non_blank(step.title).unwrap_or_else(|| format!("Step {}", j + 1)),
                description: step.description.unwrap_or_default(),
                estimated_time: step.estimated_time.as_ref().map(time_text).unwrap_or_default(),
                skills_covered: skill_names(step.skills_covered),
            },
        })
        .collect();

    let mut skills_in_module: Vec<String> = Vec::new();
    for skill in steps.iter().flat_map(|s| s.skills_covered.iter()) {
        if !skills_in_module.contains(skill) {
            skills_in_module.push(skill.clone());
        }
    }

    let hours = sum_step_hours(&steps);
    let title = non_blank(path.title).unwrap_or_else(|| ctx.fallback_title.to_string());

    CanonicalLearningPath {
        path_title: title.clone(),
        learner_id: ctx.learner_id.to_string(),
        total_estimated_duration_hours: hours,
        learning_modules: vec![LearningModule {
            module_order: 1,
            module_title: title,
            estimated_duration_hours: hours,
            skills_in_module,
            steps: Some(steps),
        }],
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 数字或以数字开头的字符串（如 "2.5 hours"）
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_number(s),
        _ => None,
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    number_of(value).map(|n| n.round() as i64)
}

fn leading_number(s: &str) -> Option<f64> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

fn time_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => format!("{n} hours"),
        other => other.to_string(),
    }
}

fn sum_step_hours(steps: &[LearningStep]) -> f64 {
    steps
        .iter()
        .filter_map(|s| leading_number(&s.estimated_time))
        .sum()
}
