//! 流水线构建器：统一装配协作方
//!
//! 未显式注入的协作方使用内存实现，LLM 默认为带示例响应的 Scripted 客户端。

use std::sync::Arc;

use crate::config::{AppConfig, LlmSection};
use crate::core::orchestrator::{Collaborators, PathGenerator, Pipeline, PipelineSettings};
use crate::core::supervisor::RunSupervisor;
use crate::jobs::{InMemoryJobLedger, JobLedger};
use crate::llm::{CompletionClient, OpenAiCompletionClient, ScriptedCompletionClient};
use crate::observability::{PipelineObserver, TracingObserver};
use crate::prompts::{FilePromptSource, PromptSource, StaticPromptSource};
use crate::services::{
    ApprovalPolicy, ApprovalRequester, ExpansionStore, HttpTaxonomyClient, InMemoryApprovalRequester,
    InMemoryExpansionStore, InMemoryLearningPathStore, InMemorySkillsGapStore, LearningPathStore,
    SkillsGapStore, SkillsTaxonomy, StaticApprovalPolicy,
};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 选定的补全后端
#[derive(Debug, Clone, PartialEq)]
pub enum LlmBackend {
    Scripted,
    Remote {
        base_url: Option<String>,
        model: String,
        api_key: String,
    },
}

/// 按 [llm] 配置与可用的 API Key 选择后端
///
/// provider = deepseek 时优先 DEEPSEEK_API_KEY，其次 OPENAI_API_KEY，base_url 缺省为官方端点；
/// provider = openai 只认 OPENAI_API_KEY；没有可用 Key 时回退到 Scripted。
pub fn select_backend(
    llm: &LlmSection,
    deepseek_key: Option<String>,
    openai_key: Option<String>,
) -> LlmBackend {
    let (api_key, default_base) = match llm.provider.to_lowercase().as_str() {
        "mock" => return LlmBackend::Scripted,
        "deepseek" => (deepseek_key.or(openai_key), Some(DEEPSEEK_BASE_URL)),
        "openai" => (openai_key, None),
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider");
            return LlmBackend::Scripted;
        }
    };
    match api_key {
        Some(api_key) => LlmBackend::Remote {
            base_url: llm.base_url.clone().or(default_base.map(String::from)),
            model: llm.model.clone(),
            api_key,
        },
        None => LlmBackend::Scripted,
    }
}

/// 根据配置与环境变量创建补全客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn CompletionClient> {
    let backend = select_backend(
        &cfg.llm,
        std::env::var("DEEPSEEK_API_KEY").ok(),
        std::env::var("OPENAI_API_KEY").ok(),
    );
    match backend {
        LlmBackend::Remote {
            base_url,
            model,
            api_key,
        } => {
            tracing::info!(provider = %cfg.llm.provider, model = %model, "Using remote LLM");
            Arc::new(OpenAiCompletionClient::new(base_url.as_deref(), &model, Some(api_key.as_str())))
        }
        LlmBackend::Scripted => {
            tracing::warn!(provider = %cfg.llm.provider, "No usable API key, using scripted LLM");
            Arc::new(ScriptedCompletionClient::with_sample_responses())
        }
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    settings: PipelineSettings,
    max_concurrent_runs: Option<usize>,
    ledger: Option<Arc<dyn JobLedger>>,
    llm: Option<Arc<dyn CompletionClient>>,
    prompts: Option<Arc<dyn PromptSource>>,
    taxonomy: Option<Arc<dyn SkillsTaxonomy>>,
    paths: Option<Arc<dyn LearningPathStore>>,
    gaps: Option<Arc<dyn SkillsGapStore>>,
    expansions: Option<Arc<dyn ExpansionStore>>,
    policy: Option<Arc<dyn ApprovalPolicy>>,
    approvals: Option<Arc<dyn ApprovalRequester>>,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置装配 LLM、prompt 目录、分类服务与流水线参数
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new()
            .with_settings(cfg.pipeline_settings())
            .with_max_concurrent_runs(cfg.pipeline.max_concurrent_runs)
            .with_llm(create_llm_from_config(cfg))
            .with_prompts(Arc::new(FilePromptSource::new(cfg.app.prompts_dir.clone())))
            .with_taxonomy(Arc::new(HttpTaxonomyClient::new(
                cfg.taxonomy.base_url.clone(),
                cfg.taxonomy.timeout_secs,
            )))
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = Some(max);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn JobLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn CompletionClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_taxonomy(mut self, taxonomy: Arc<dyn SkillsTaxonomy>) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    pub fn with_learning_paths(mut self, paths: Arc<dyn LearningPathStore>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn with_skills_gaps(mut self, gaps: Arc<dyn SkillsGapStore>) -> Self {
        self.gaps = Some(gaps);
        self
    }

    pub fn with_expansions(mut self, expansions: Arc<dyn ExpansionStore>) -> Self {
        self.expansions = Some(expansions);
        self
    }

    pub fn with_approval_policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_approval_requester(mut self, approvals: Arc<dyn ApprovalRequester>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> PathGenerator {
        let ledger = self.ledger.unwrap_or_else(|| {
            // 默认台账的变更通知无人消费
            let (ledger, _events) = InMemoryJobLedger::new();
            Arc::new(ledger)
        });
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));

        let collaborators = Collaborators {
            ledger: ledger.clone(),
            llm: self
                .llm
                .unwrap_or_else(|| Arc::new(ScriptedCompletionClient::with_sample_responses())),
            prompts: self
                .prompts
                .unwrap_or_else(|| Arc::new(StaticPromptSource::new())),
            taxonomy: self
                .taxonomy
                .unwrap_or_else(|| Arc::new(HttpTaxonomyClient::fallback_only())),
            paths: self
                .paths
                .unwrap_or_else(|| Arc::new(InMemoryLearningPathStore::new())),
            gaps: self
                .gaps
                .unwrap_or_else(|| Arc::new(InMemorySkillsGapStore::new())),
            expansions: self
                .expansions
                .unwrap_or_else(|| Arc::new(InMemoryExpansionStore::new())),
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(StaticApprovalPolicy::new())),
            approvals: self
                .approvals
                .unwrap_or_else(|| Arc::new(InMemoryApprovalRequester::default())),
            observer: observer.clone(),
        };

        let supervisor = Arc::new(RunSupervisor::new(
            self.max_concurrent_runs.unwrap_or(4),
            ledger,
            observer,
        ));
        let pipeline = Arc::new(Pipeline::new(collaborators, self.settings));
        PathGenerator::new(pipeline, supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use crate::path::SkillsGap;

    fn llm(provider: &str) -> LlmSection {
        LlmSection {
            provider: provider.into(),
            ..LlmSection::default()
        }
    }

    #[test]
    fn test_deepseek_backend_uses_configured_model_and_default_endpoint() {
        let section = LlmSection {
            model: "deepseek-reasoner".into(),
            ..llm("deepseek")
        };
        let backend = select_backend(&section, None, Some("sk-openai".into()));
        assert_eq!(
            backend,
            LlmBackend::Remote {
                base_url: Some(DEEPSEEK_BASE_URL.into()),
                model: "deepseek-reasoner".into(),
                api_key: "sk-openai".into(),
            }
        );

        let section = LlmSection {
            base_url: Some("http://proxy.local/v1".into()),
            ..llm("DeepSeek")
        };
        let LlmBackend::Remote { base_url, api_key, .. } =
            select_backend(&section, Some("sk-ds".into()), Some("sk-openai".into()))
        else {
            panic!("expected remote backend");
        };
        assert_eq!(base_url.as_deref(), Some("http://proxy.local/v1"));
        assert_eq!(api_key, "sk-ds");
    }

    #[test]
    fn test_backend_falls_back_to_scripted() {
        assert_eq!(select_backend(&llm("mock"), Some("k".into()), Some("k".into())), LlmBackend::Scripted);
        assert_eq!(select_backend(&llm("openai"), Some("sk-ds".into()), None), LlmBackend::Scripted);
        assert_eq!(select_backend(&llm("deepseek"), None, None), LlmBackend::Scripted);
        assert_eq!(select_backend(&llm("claude"), None, Some("k".into())), LlmBackend::Scripted);
        assert!(matches!(
            select_backend(&llm("openai"), None, Some("sk".into())),
            LlmBackend::Remote { base_url: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_default_build_completes_a_run() {
        let generator = PipelineBuilder::new().build();
        let receipt = generator
            .generate(SkillsGap::new("u1", "c1", "Frontend Development"))
            .await
            .unwrap();
        assert_eq!(receipt.status, JobStatus::Pending);

        generator.supervisor().wait(&receipt.job_id).await;
        let job = generator.ledger().get(&receipt.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_mock_provider_from_config() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        // 只要不 panic 即可：mock 不依赖任何环境变量
        let _llm = create_llm_from_config(&cfg);
    }
}
