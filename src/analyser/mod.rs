//! Failure Analyser (C4) — turns a terminally failed step into a structured
//! diagnosis. Never throws: LLM or store failures degrade to
//! `understood=false` with the error captured in `reasoning`, because a
//! broken analyser must not take down the Run that triggered it (§4.4).

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::CoreError;
use crate::llm::{AnalysisRequest, EmbeddingClient, LlmClient};
use crate::protocol::{FailureAnalysis, Step};
use crate::store::{KnowledgeStore, Metadata, Scalar};

pub struct AnalyseInput<'a> {
    pub test_id: &'a str,
    pub step: &'a Step,
    pub error_kind: &'a str,
    pub error_message: &'a str,
    pub current_url: &'a str,
    pub page_title: &'a str,
}

pub struct FailureAnalyser {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl FailureAnalyser {
    pub fn new(store: Arc<dyn KnowledgeStore>, llm: Arc<dyn LlmClient>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, llm, embedder }
    }

    pub async fn analyse(&self, input: AnalyseInput<'_>) -> FailureAnalysis {
        let mut log = Vec::new();
        log.push(format!("start: analysing failure of step {}", input.step.ordinal));

        log.push(format!("intent extraction: '{}'", input.step.description));

        let query = format!("failure: {} {}", input.step.description, input.error_message);
        let mut filter = Metadata::new();
        filter.insert("type".to_string(), Scalar::Str("failure_analysis".to_string()));
        let retrieved = match self.embedder.embed(&query).await {
            Ok(embedding) => match self.store.query(&embedding, 3, Some(&filter), Some(&query)).await {
                Ok(hits) => {
                    log.push(format!("cache lookup: {} related analyses found", hits.len()));
                    hits.into_iter().map(|h| h.document).collect::<Vec<_>>()
                }
                Err(e) => {
                    log.push(format!("cache lookup: store unavailable ({e})"));
                    Vec::new()
                }
            },
            Err(e) => {
                log.push(format!("cache lookup: embedding unavailable ({e})"));
                Vec::new()
            }
        };

        log.push("model invocation: requesting structured diagnosis".to_string());
        let response = self
            .llm
            .analyse_failure(AnalysisRequest {
                description: input.step.description.clone(),
                error_message: input.error_message.to_string(),
                current_url: input.current_url.to_string(),
                page_title: input.page_title.to_string(),
                retrieved_context: retrieved,
            })
            .await;

        let analysis = match response {
            Ok(resp) => {
                log.push(format!("decision: understood={}, confidence={:.2}", resp.understood, resp.confidence));
                FailureAnalysis {
                    understood: resp.understood,
                    intent: resp.intent,
                    possible_causes: resp.possible_causes,
                    suggested_fixes: resp.suggested_fixes,
                    confidence: resp.confidence,
                    raw_model_log: log.clone(),
                }
            }
            Err(e) => {
                log.push(format!("decision: model invocation failed ({e})"));
                FailureAnalysis {
                    understood: false,
                    intent: input.step.description.clone(),
                    possible_causes: Vec::new(),
                    suggested_fixes: Vec::new(),
                    confidence: 0.0,
                    raw_model_log: log.clone(),
                }
            }
        };

        if let Err(e) = self.persist(input, &analysis).await {
            log.push(format!("store: persistence failed ({e})"));
        } else {
            log.push("store: analysis persisted".to_string());
        }

        FailureAnalysis { raw_model_log: log, ..analysis }
    }

    async fn persist(&self, input: AnalyseInput<'_>, analysis: &FailureAnalysis) -> Result<(), CoreError> {
        let document = format!(
            "failure analysis: {} — {}",
            input.step.description, analysis.intent
        );
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), Scalar::Str("failure_analysis".to_string()));
        metadata.insert("testId".to_string(), Scalar::Str(input.test_id.to_string()));
        metadata.insert("stepOrdinal".to_string(), Scalar::Int(input.step.ordinal as i64));
        metadata.insert("errorKind".to_string(), Scalar::Str(input.error_kind.to_string()));
        metadata.insert("understood".to_string(), Scalar::Bool(analysis.understood));
        metadata.insert("confidence".to_string(), Scalar::Float(analysis.confidence));

        let embedding = self.embedder.embed(&document).await?;
        self.store.store(&Uuid::new_v4().to_string(), &document, embedding, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbeddingClient, MockLlmClient};
    use crate::protocol::StepKind;
    use crate::store::InMemoryKnowledgeStore;

    fn step() -> Step {
        Step {
            ordinal: 2,
            kind: StepKind::Click,
            target: "#nonexistent-button".to_string(),
            data: None,
            expected: None,
            description: "Click submit".to_string(),
        }
    }

    #[tokio::test]
    async fn produces_at_least_six_log_lines() {
        let store = Arc::new(InMemoryKnowledgeStore::new(0));
        let llm = Arc::new(MockLlmClient::default());
        let embedder = Arc::new(MockEmbeddingClient::new(0));
        let analyser = FailureAnalyser::new(store, llm, embedder);

        let step = step();
        let analysis = analyser
            .analyse(AnalyseInput {
                test_id: "plan-1",
                step: &step,
                error_kind: "locator_unresolvable",
                error_message: "no visible element matched",
                current_url: "https://example.com",
                page_title: "Example",
            })
            .await;

        assert!(analysis.raw_model_log.len() >= 6, "{:?}", analysis.raw_model_log);
        assert!(analysis.understood);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_not_understood() {
        let store = Arc::new(InMemoryKnowledgeStore::new(0));
        let llm = Arc::new(MockLlmClient { analysis: std::sync::Mutex::new(Some(Err("boom".to_string()))), ..Default::default() });
        let embedder = Arc::new(MockEmbeddingClient::new(0));
        let analyser = FailureAnalyser::new(store, llm, embedder);

        let step = step();
        let analysis = analyser
            .analyse(AnalyseInput {
                test_id: "plan-1",
                step: &step,
                error_kind: "internal",
                error_message: "boom",
                current_url: "https://example.com",
                page_title: "Example",
            })
            .await;

        assert!(!analysis.understood);
        assert_eq!(analysis.confidence, 0.0);
    }
}
