//! Prompt 模板：按名称加载，`{placeholder}` 替换由编排器完成
//!
//! 目录中的 `<name>.txt` 优先；缺失时回退到内置模板（config/prompts/ 编译期嵌入）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

pub const SKILL_EXPANSION: &str = "skill-expansion";
pub const COMPETENCY_IDENTIFICATION: &str = "competency-identification";
pub const PATH_CREATION: &str = "path-creation";

const BUILTIN_SKILL_EXPANSION: &str = include_str!("../../config/prompts/skill-expansion.txt");
const BUILTIN_COMPETENCY_IDENTIFICATION: &str =
    include_str!("../../config/prompts/competency-identification.txt");
const BUILTIN_PATH_CREATION: &str = include_str!("../../config/prompts/path-creation.txt");

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("prompt template not found: {0}")]
    NotFound(String),

    #[error("failed to read prompt template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// 模板来源
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn load(&self, name: &str) -> Result<String, PromptError>;
}

/// 内置模板
pub fn builtin_template(name: &str) -> Option<&'static str> {
    match name {
        SKILL_EXPANSION => Some(BUILTIN_SKILL_EXPANSION),
        COMPETENCY_IDENTIFICATION => Some(BUILTIN_COMPETENCY_IDENTIFICATION),
        PATH_CREATION => Some(BUILTIN_PATH_CREATION),
        _ => None,
    }
}

/// 从目录读取 `<dir>/<name>.txt`
pub struct FilePromptSource {
    dir: PathBuf,
}

impl FilePromptSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PromptSource for FilePromptSource {
    async fn load(&self, name: &str) -> Result<String, PromptError> {
        let path = self.dir.join(format!("{name}.txt"));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "prompt file missing, using built-in template");
                builtin_template(name)
                    .map(str::to_string)
                    .ok_or_else(|| PromptError::NotFound(name.to_string()))
            }
            Err(source) => Err(PromptError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// 内存模板表；未登记的名称回退到内置模板
#[derive(Default)]
pub struct StaticPromptSource {
    templates: HashMap<String, String>,
}

impl StaticPromptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(name.into(), template.into());
        self
    }
}

#[async_trait]
impl PromptSource for StaticPromptSource {
    async fn load(&self, name: &str) -> Result<String, PromptError> {
        self.templates
            .get(name)
            .cloned()
            .or_else(|| builtin_template(name).map(str::to_string))
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }
}

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

/// 替换 `{name}` 占位符；未知占位符原样保留
///
/// 只匹配标识符形式的占位符，模板里的 JSON 示例（`{"a": 1}`）不受影响。
pub fn render_template(template: &str, values: &[(&str, String)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match values.iter().find(|(k, _)| *k == key) {
                Some((_, v)) => v.clone(),
                None => {
                    tracing::debug!(placeholder = key, "unknown prompt placeholder left as-is");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
