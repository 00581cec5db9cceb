//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PATHGEN__*` 覆盖（双下划线表示嵌套，如 `PATHGEN__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::PipelineSettings;
use crate::llm::CompletionOptions;
use crate::services::BreakdownOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
    pub taxonomy: TaxonomySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// prompt 模板目录，缺失的模板回退到内置版本
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

fn default_app_name() -> String {
    "pathgen".to_string()
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("config/prompts")
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / mock；实际后端还取决于是否设置了 API Key
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_llm_retries() -> u32 {
    2
}

/// [pipeline] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_validation_attempts")]
    pub max_validation_attempts: u32,
    #[serde(default = "default_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// 回收崩溃运行的周期（秒）
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_validation_attempts: default_validation_attempts(),
            max_concurrent_runs: default_concurrent_runs(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

fn default_validation_attempts() -> u32 {
    3
}

fn default_concurrent_runs() -> usize {
    4
}

fn default_reap_interval() -> u64 {
    30
}

/// [taxonomy] 段：未设置 base_url 时只使用回退数据
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomySection {
    pub base_url: Option<String>,
    #[serde(default = "default_taxonomy_retries")]
    pub max_retries: u32,
    #[serde(default = "default_taxonomy_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_include_expansions")]
    pub include_expansions: bool,
}

impl Default for TaxonomySection {
    fn default() -> Self {
        Self {
            base_url: None,
            max_retries: default_taxonomy_retries(),
            timeout_secs: default_taxonomy_timeout(),
            include_expansions: default_include_expansions(),
        }
    }
}

fn default_taxonomy_retries() -> u32 {
    2
}

fn default_taxonomy_timeout() -> u64 {
    30
}

fn default_include_expansions() -> bool {
    true
}

impl AppConfig {
    /// 转为编排器参数
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_validation_attempts: self.pipeline.max_validation_attempts,
            completion: CompletionOptions {
                timeout_ms: self.llm.timeout_ms,
                max_retries: self.llm.max_retries,
            },
            breakdown: BreakdownOptions {
                max_retries: self.taxonomy.max_retries,
                use_fallback: false,
                include_expansions: self.taxonomy.include_expansions,
            },
        }
    }
}

/// 从 config 目录加载配置，环境变量 PATHGEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PATHGEN__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PATHGEN")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时告警并使用默认值
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    })
}
