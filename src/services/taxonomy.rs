//! 技能分类服务客户端
//!
//! `POST {base_url}/skills/breakdown`，有限次重试；`use_fallback` 或未配置地址时
//! 直接返回确定性的回退拆解，保证流水线不会因为这个依赖中止。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BreakdownOptions, SkillsTaxonomy};
use crate::path::{CompetencyRecord, SkillBreakdown, SkillBreakdownMap};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaxonomyError {
    #[error("taxonomy request failed: {0}")]
    Request(String),

    #[error("taxonomy service returned HTTP {0}")]
    Status(u16),

    #[error("unreadable taxonomy response: {0}")]
    InvalidResponse(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownRequest<'a> {
    competencies: &'a [CompetencyRecord],
    include_expansions: bool,
}

/// 已知的两种响应：`{"breakdown": {...}}` 或直接是映射
#[derive(Deserialize)]
#[serde(untagged)]
enum BreakdownResponse {
    Wrapped { breakdown: SkillBreakdownMap },
    Direct(SkillBreakdownMap),
}

impl From<BreakdownResponse> for SkillBreakdownMap {
    fn from(resp: BreakdownResponse) -> Self {
        match resp {
            BreakdownResponse::Wrapped { breakdown } => breakdown,
            BreakdownResponse::Direct(map) => map,
        }
    }
}

/// 确定性回退拆解：每个能力生成基础 / 应用两个 micro 技能和一个 nano 技能
pub fn fallback_breakdown(competencies: &[CompetencyRecord]) -> SkillBreakdownMap {
    competencies
        .iter()
        .map(|c| {
            let name = c.name.trim();
            (
                name.to_string(),
                SkillBreakdown {
                    micro_skills: vec![format!("{name} Fundamentals"), format!("Applied {name}")],
                    nano_skills: vec![format!("{name} Terminology")],
                },
            )
        })
        .collect::<BTreeMap<_, _>>()
}

pub struct HttpTaxonomyClient {
    client: Client,
    base_url: Option<String>,
}

impl HttpTaxonomyClient {
    pub fn new(base_url: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, timeout_secs, "Failed to build taxonomy HTTP client, using defaults without timeout");
                Client::new()
            });
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// 只产生回退数据的客户端
    pub fn fallback_only() -> Self {
        Self::new(None, 30)
    }

    async fn fetch(
        &self,
        base_url: &str,
        competencies: &[CompetencyRecord],
        include_expansions: bool,
    ) -> Result<SkillBreakdownMap, TaxonomyError> {
        let resp = self
            .client
            .post(format!("{base_url}/skills/breakdown"))
            .json(&BreakdownRequest {
                competencies,
                include_expansions,
            })
            .send()
            .await
            .map_err(|e| TaxonomyError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TaxonomyError::Status(resp.status().as_u16()));
        }
        let body: BreakdownResponse = resp
            .json()
            .await
            .map_err(|e| TaxonomyError::InvalidResponse(e.to_string()))?;
        Ok(body.into())
    }
}

#[async_trait]
impl SkillsTaxonomy for HttpTaxonomyClient {
    async fn breakdown(
        &self,
        competencies: &[CompetencyRecord],
        options: &BreakdownOptions,
    ) -> Result<SkillBreakdownMap, TaxonomyError> {
        let base_url = match (&self.base_url, options.use_fallback) {
            (Some(url), false) => url,
            _ => return Ok(fallback_breakdown(competencies)),
        };

        let mut last_err = TaxonomyError::Request("no attempt made".to_string());
        for attempt in 0..=options.max_retries {
            match self
                .fetch(base_url, competencies, options.include_expansions)
                .await
            {
                Ok(map) => return Ok(map),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "taxonomy breakdown attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_is_deterministic() {
        let comps = vec![CompetencyRecord::named("React"), CompetencyRecord::named(" CSS ")];
        let a = fallback_breakdown(&comps);
        assert_eq!(a, fallback_breakdown(&comps));
        assert_eq!(a["React"].micro_skills, vec!["React Fundamentals", "Applied React"]);
        assert_eq!(a["CSS"].nano_skills, vec!["CSS Terminology"]);
    }

    #[test]
    fn test_both_response_shapes() {
        let wrapped: BreakdownResponse = serde_json::from_value(json!({
            "breakdown": {"React": {"microSkills": ["Hooks"], "nanoSkills": []}}
        }))
        .unwrap();
        let direct: BreakdownResponse = serde_json::from_value(json!({
            "React": {"micro_skills": ["Hooks"]}
        }))
        .unwrap();
        let a: SkillBreakdownMap = wrapped.into();
        let b: SkillBreakdownMap = direct.into();
        assert_eq!(a, b);
        assert_eq!(a["React"].micro_skills, vec!["Hooks"]);
    }

    #[tokio::test]
    async fn test_without_base_url_uses_fallback() {
        let client = HttpTaxonomyClient::fallback_only();
        let map = client
            .breakdown(&[CompetencyRecord::named("Testing")], &BreakdownOptions::default())
            .await
            .unwrap();
        assert!(map.contains_key("Testing"));
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_error() {
        let client = HttpTaxonomyClient::new(Some("http://127.0.0.1:1".into()), 2);
        let options = BreakdownOptions {
            max_retries: 0,
            ..BreakdownOptions::default()
        };
        let result = client.breakdown(&[CompetencyRecord::named("X")], &options).await;
        assert!(matches!(result, Err(TaxonomyError::Request(_))));

        let forced = BreakdownOptions {
            use_fallback: true,
            ..options
        };
        assert!(client.breakdown(&[CompetencyRecord::named("X")], &forced).await.is_ok());
    }
}
