//! Pluggable LLM and embedding clients.
//!
//! The core never talks to a specific provider: every call to a model goes
//! through one of these two traits, mirroring the provider-abstraction
//! pattern of an `LlmProvider` trait with a deterministic mock standing in
//! for the network in tests. Timeouts (§5: 15s for corrections, 20s for
//! analysis) are the caller's responsibility — these traits model the
//! request/response contract, not transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::driver::DomElement;
use crate::errors::CoreError;
use crate::protocol::StepKind;

pub mod http_client;
pub use http_client::{HttpEmbeddingClient, HttpLlmClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub snapshot: Vec<DomElement>,
    pub description: String,
    pub failing_target: String,
    pub kind: StepKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionResponse {
    pub locator: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub description: String,
    pub error_message: String,
    pub current_url: String,
    pub page_title: String,
    /// Prior related executions/corrections retrieved from the Knowledge Store.
    pub retrieved_context: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub understood: bool,
    pub intent: String,
    pub possible_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConsolidationRequest {
    pub changed_files: Vec<String>,
    pub commit_message: String,
    pub retrieved_records: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactPlanPriority {
    pub plan_id: String,
    pub priority: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConsolidationResponse {
    pub recommended_plans: Vec<ImpactPlanPriority>,
    pub summary_recommendation: String,
}

/// Structured-JSON model calls used by the Selector Resolver (C3), Failure
/// Analyser (C4), and Impact Analyser (C8). Implementations must validate
/// their own response shape and return `CoreError::LlmSchema` on mismatch —
/// callers re-prompt once (C3) or fall back to deterministic handling.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn propose_selector_correction(
        &self,
        request: CorrectionRequest,
    ) -> Result<CorrectionResponse, CoreError>;

    async fn analyse_failure(&self, request: AnalysisRequest) -> Result<AnalysisResponse, CoreError>;

    async fn consolidate_impact(
        &self,
        request: ImpactConsolidationRequest,
    ) -> Result<ImpactConsolidationResponse, CoreError>;
}

/// Embeds free text into the fixed-dimensionality vector space the
/// Knowledge Store was initialized with.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

/// Deterministic test double. Callers script exactly one canned
/// correction/analysis/impact response (or none, to exercise the
/// `llm.schema` fallback path); never makes a network call.
#[derive(Default)]
pub struct MockLlmClient {
    pub correction: std::sync::Mutex<Option<Result<CorrectionResponse, String>>>,
    pub analysis: std::sync::Mutex<Option<Result<AnalysisResponse, String>>>,
    pub impact: std::sync::Mutex<Option<Result<ImpactConsolidationResponse, String>>>,
    pub call_count: std::sync::atomic::AtomicUsize,
}

impl MockLlmClient {
    pub fn with_correction(self, locator: impl Into<String>, confidence: f64) -> Self {
        *self.correction.lock().unwrap() =
            Some(Ok(CorrectionResponse { locator: locator.into(), confidence }));
        self
    }

    pub fn with_failing_correction(self) -> Self {
        *self.correction.lock().unwrap() = Some(Err("malformed response".to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn propose_selector_correction(
        &self,
        _request: CorrectionRequest,
    ) -> Result<CorrectionResponse, CoreError> {
        self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.correction.lock().unwrap().clone() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(CoreError::LlmSchema(msg)),
            None => Err(CoreError::LlmSchema("no canned correction configured".to_string())),
        }
    }

    async fn analyse_failure(&self, _request: AnalysisRequest) -> Result<AnalysisResponse, CoreError> {
        self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.analysis.lock().unwrap().clone() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(CoreError::LlmSchema(msg)),
            None => Ok(AnalysisResponse {
                understood: true,
                intent: "interact with an element described by the step".to_string(),
                possible_causes: vec!["selector no longer matches the rendered DOM".to_string()],
                suggested_fixes: vec!["re-record the selector against the current page".to_string()],
                confidence: 0.5,
                reasoning: "default mock analysis, no canned response configured".to_string(),
            }),
        }
    }

    async fn consolidate_impact(
        &self,
        _request: ImpactConsolidationRequest,
    ) -> Result<ImpactConsolidationResponse, CoreError> {
        self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.impact.lock().unwrap().clone() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(CoreError::LlmSchema(msg)),
            None => Ok(ImpactConsolidationResponse {
                recommended_plans: Vec::new(),
                summary_recommendation: "Run affected tests".to_string(),
            }),
        }
    }
}

impl Clone for CorrectionResponse {
    fn clone(&self) -> Self {
        Self { locator: self.locator.clone(), confidence: self.confidence }
    }
}
impl Clone for AnalysisResponse {
    fn clone(&self) -> Self {
        Self {
            understood: self.understood,
            intent: self.intent.clone(),
            possible_causes: self.possible_causes.clone(),
            suggested_fixes: self.suggested_fixes.clone(),
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
        }
    }
}
impl Clone for ImpactConsolidationResponse {
    fn clone(&self) -> Self {
        Self {
            recommended_plans: self.recommended_plans.clone(),
            summary_recommendation: self.summary_recommendation.clone(),
        }
    }
}
impl Clone for ImpactPlanPriority {
    fn clone(&self) -> Self {
        Self { plan_id: self.plan_id.clone(), priority: self.priority.clone(), reason: self.reason.clone() }
    }
}

/// Deterministic embedding: hashes the text into `dimensions` floats via
/// SHA-256, so identical text always produces the identical vector and
/// near-duplicate text stays far apart — good enough for exercising cosine
/// similarity in tests without a real embedding model.
pub struct MockEmbeddingClient {
    dimensions: usize,
}

impl MockEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        use sha2::{Digest, Sha256};
        let mut out = Vec::with_capacity(self.dimensions);
        let mut seed = text.as_bytes().to_vec();
        while out.len() < self.dimensions {
            let digest = Sha256::digest(&seed);
            for byte in digest.iter() {
                if out.len() >= self.dimensions {
                    break;
                }
                out.push((*byte as f32 / 255.0) * 2.0 - 1.0);
            }
            seed = digest.to_vec();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedding_is_deterministic() {
        let client = MockEmbeddingClient::new(16);
        let a = client.embed("hello world").await.unwrap();
        let b = client.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn mock_embedding_differs_for_different_text() {
        let client = MockEmbeddingClient::new(16);
        let a = client.embed("alpha").await.unwrap();
        let b = client.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn mock_llm_without_canned_correction_returns_schema_error() {
        let client = MockLlmClient::default();
        let err = client
            .propose_selector_correction(CorrectionRequest {
                snapshot: vec![],
                description: "click submit".into(),
                failing_target: "css:#submit".into(),
                kind: StepKind::Click,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "llm.schema");
    }

    #[tokio::test]
    async fn mock_llm_with_canned_correction_returns_it() {
        let client = MockLlmClient::default().with_correction("text=Submit", 0.8);
        let resp = client
            .propose_selector_correction(CorrectionRequest {
                snapshot: vec![],
                description: "click submit".into(),
                failing_target: "css:#submit".into(),
                kind: StepKind::Click,
            })
            .await
            .unwrap();
        assert_eq!(resp.locator, "text=Submit");
        assert_eq!(client.calls(), 1);
    }
}
