//! Impact Analyser (C8) — given a set of changed file paths, ranks which
//! Plans are worth re-running. Path-pattern risk classification is a
//! deterministic first pass; the LLM only consolidates and prioritizes
//! across whatever the retrieval step surfaced (§4.8), the same
//! classify-then-delegate-to-the-model shape the Selector Resolver and
//! Failure Analyser use.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{EmbeddingClient, ImpactConsolidationRequest, LlmClient};
use crate::store::{KnowledgeStore, Metadata, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Classifies a single changed path by keyword matching against its
/// components. Highest-risk keyword wins when a path matches more than one
/// category (e.g. `src/auth/api/login.rs` matches both `auth` and `api`).
pub fn classify_path(path: &str) -> RiskLevel {
    let lower = path.to_lowercase();
    const CRITICAL: &[&str] = &["auth", "payment", "billing", "admin"];
    const HIGH: &[&str] = &["api", "db", "database", "model", "migration"];
    const LOW: &[&str] = &["docs", "doc", "readme", "style", "styles", "css", "md"];

    if CRITICAL.iter().any(|kw| lower.contains(kw)) {
        RiskLevel::Critical
    } else if HIGH.iter().any(|kw| lower.contains(kw)) {
        RiskLevel::High
    } else if LOW.iter().any(|kw| lower.contains(kw)) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactedPlan {
    pub plan_id: String,
    pub priority: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub changed_files: Vec<String>,
    pub worst_risk: RiskLevel,
    pub recommended_plans: Vec<ImpactedPlan>,
    pub summary: String,
}

pub struct ImpactAnalyser {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl ImpactAnalyser {
    pub fn new(store: Arc<dyn KnowledgeStore>, llm: Arc<dyn LlmClient>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, llm, embedder }
    }

    pub async fn analyse(&self, changed_files: &[String], commit_message: &str) -> ImpactReport {
        let worst_risk = changed_files
            .iter()
            .map(|f| classify_path(f))
            .max()
            .unwrap_or(RiskLevel::Low);

        let query = changed_files.join(" ");
        let mut filter = Metadata::new();
        filter.insert("type".to_string(), Scalar::Str("execution_record".to_string()));
        let retrieved = match self.embedder.embed(&query).await {
            Ok(embedding) => match self.store.query(&embedding, 10, Some(&filter), Some(&query)).await {
                Ok(hits) => hits.into_iter().map(|h| h.document).collect::<Vec<_>>(),
                Err(e) => {
                    tracing::warn!(error = %e, "impact retrieval failed, falling back to risk classification only");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "impact query embedding failed, falling back to risk classification only");
                Vec::new()
            }
        };

        match self
            .llm
            .consolidate_impact(ImpactConsolidationRequest {
                changed_files: changed_files.to_vec(),
                commit_message: commit_message.to_string(),
                retrieved_records: retrieved,
            })
            .await
        {
            Ok(response) => ImpactReport {
                changed_files: changed_files.to_vec(),
                worst_risk,
                recommended_plans: response
                    .recommended_plans
                    .into_iter()
                    .map(|p| ImpactedPlan { plan_id: p.plan_id, priority: p.priority, reason: p.reason })
                    .collect(),
                summary: response.summary_recommendation,
            },
            Err(e) => {
                tracing::warn!(error = %e, "impact consolidation failed, returning risk classification only");
                ImpactReport {
                    changed_files: changed_files.to_vec(),
                    worst_risk,
                    recommended_plans: Vec::new(),
                    summary: format!("model unavailable; highest path risk is {}", worst_risk.as_str()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbeddingClient, MockLlmClient};
    use crate::store::InMemoryKnowledgeStore;

    #[test]
    fn classifies_auth_paths_as_critical() {
        assert_eq!(classify_path("src/auth/login.rs"), RiskLevel::Critical);
    }

    #[test]
    fn classifies_api_paths_as_high() {
        assert_eq!(classify_path("src/api/handlers.rs"), RiskLevel::High);
    }

    #[test]
    fn classifies_docs_as_low() {
        assert_eq!(classify_path("docs/readme.md"), RiskLevel::Low);
    }

    #[test]
    fn classifies_unmatched_paths_as_medium() {
        assert_eq!(classify_path("src/util/format.rs"), RiskLevel::Medium);
    }

    #[tokio::test]
    async fn analyse_picks_worst_risk_across_changed_files() {
        let store = Arc::new(InMemoryKnowledgeStore::new(0));
        let llm = Arc::new(MockLlmClient::default());
        let embedder = Arc::new(MockEmbeddingClient::new(0));
        let analyser = ImpactAnalyser::new(store, llm, embedder);

        let report = analyser
            .analyse(&["docs/readme.md".to_string(), "src/auth/session.rs".to_string()], "tighten session expiry")
            .await;

        assert_eq!(report.worst_risk, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_risk_only_summary() {
        let store = Arc::new(InMemoryKnowledgeStore::new(0));
        let llm = Arc::new(MockLlmClient {
            impact: std::sync::Mutex::new(Some(Err("boom".to_string()))),
            ..Default::default()
        });
        let embedder = Arc::new(MockEmbeddingClient::new(0));
        let analyser = ImpactAnalyser::new(store, llm, embedder);

        let report = analyser.analyse(&["src/api/users.rs".to_string()], "add endpoint").await;
        assert!(report.recommended_plans.is_empty());
        assert!(report.summary.contains("high"));
    }
}
