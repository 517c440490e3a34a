//! Selector Resolver (C3) — turns a failing locator into a working one.
//!
//! Stage order is load-bearing (§9: "cache-miss → LLM flow ordering"): cache
//! lookup, then deterministic DOM heuristics, then the LLM, each stage
//! exiting on first success. Skipping straight to the LLM would still work
//! functionally but silently regresses the system's dominant cost/latency
//! saving, so this module always tries stages in that order and in tests
//! asserts on `llm.calls()` staying zero when an earlier stage should have won.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::driver::DomElement;
use crate::errors::CoreError;
use crate::llm::{CorrectionRequest, EmbeddingClient, LlmClient};
use crate::locator;
use crate::protocol::{CorrectionSource, SelectorCorrection, StepKind};
use crate::store::{KnowledgeStore, Metadata, Scalar};

pub struct ResolveInput<'a> {
    pub original_target: &'a str,
    pub description: &'a str,
    pub kind: StepKind,
    pub data: Option<&'a str>,
    pub url: &'a str,
    pub snapshot: Vec<DomElement>,
}

pub struct ResolveOutcome {
    pub corrected_target: String,
    pub correction: SelectorCorrection,
}

pub struct SelectorResolver {
    store: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl SelectorResolver {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self { store, llm, embedder }
    }

    /// Returns `Ok` with the corrected locator on success, `Err(None)` when
    /// every stage is exhausted ("not resolvable" — the caller sets
    /// `errorKind=locator_unresolvable`), or `Err(Some(_))` when a stage
    /// itself failed unexpectedly (store/LLM transport error).
    pub async fn resolve(&self, input: ResolveInput<'_>) -> Result<ResolveOutcome, Option<CoreError>> {
        if let Some(outcome) = self.try_cache(&input).await? {
            self.persist_correction(&input, &outcome.correction).await;
            return Ok(outcome);
        }

        if let Some(outcome) = self.try_deterministic(&input) {
            self.persist_correction(&input, &outcome.correction).await;
            return Ok(outcome);
        }

        match self.try_llm(&input).await {
            Ok(Some(outcome)) => {
                self.persist_correction(&input, &outcome.correction).await;
                Ok(outcome)
            }
            Ok(None) => Err(None),
            Err(e) => Err(Some(e)),
        }
    }

    async fn try_cache(&self, input: &ResolveInput<'_>) -> Result<Option<ResolveOutcome>, Option<CoreError>> {
        let query_text = format!("selector correction: {} {}", input.original_target, input.description);
        let embedding = self
            .embedder
            .embed(&query_text)
            .await
            .map_err(Some)?;

        let mut filter = Metadata::new();
        filter.insert("type".to_string(), Scalar::Str("selector_correction".to_string()));

        let hits = self
            .store
            .query(&embedding, 10, Some(&filter), None)
            .await
            .map_err(Some)?;

        let Some(top) = hits.into_iter().next() else { return Ok(None) };

        let original_matches = matches!(
            top.metadata.get("originalTarget"),
            Some(Scalar::Str(t)) if t == input.original_target
        );
        let description_matches = matches!(
            top.metadata.get("description"),
            Some(Scalar::Str(d)) if d == input.description
        );
        if !original_matches && !description_matches {
            return Ok(None);
        }
        let Some(Scalar::Str(corrected)) = top.metadata.get("correctedTarget") else {
            return Ok(None);
        };

        let correction = SelectorCorrection::new(
            input.original_target,
            corrected.clone(),
            CorrectionSource::Cache,
            top.similarity,
        );
        Ok(Some(ResolveOutcome { corrected_target: corrected.clone(), correction }))
    }

    fn try_deterministic(&self, input: &ResolveInput<'_>) -> Option<ResolveOutcome> {
        let candidates = deterministic_candidates(input);
        for candidate in candidates {
            if element_resolves(&input.snapshot, &candidate) {
                let correction = SelectorCorrection::new(
                    input.original_target,
                    candidate.clone(),
                    CorrectionSource::Deterministic,
                    0.7,
                );
                return Some(ResolveOutcome { corrected_target: candidate, correction });
            }
        }
        None
    }

    async fn try_llm(&self, input: &ResolveInput<'_>) -> Result<Option<ResolveOutcome>, CoreError> {
        let response = self
            .llm
            .propose_selector_correction(CorrectionRequest {
                snapshot: input.snapshot.clone(),
                description: input.description.to_string(),
                failing_target: input.original_target.to_string(),
                kind: input.kind,
            })
            .await?;

        if locator::parse(&response.locator).is_err() {
            return Ok(None);
        }

        let correction = SelectorCorrection::new(
            input.original_target,
            response.locator.clone(),
            CorrectionSource::Llm,
            response.confidence,
        );
        Ok(Some(ResolveOutcome { corrected_target: response.locator, correction }))
    }

    async fn persist_correction(&self, input: &ResolveInput<'_>, correction: &SelectorCorrection) {
        let document = format!(
            "selector correction: {} -> {} ({})",
            correction.original_target, correction.corrected_target, input.description
        );
        let Ok(embedding) = self.embedder.embed(&document).await else { return };

        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), Scalar::Str("selector_correction".to_string()));
        metadata.insert("originalTarget".to_string(), Scalar::Str(correction.original_target.clone()));
        metadata.insert("correctedTarget".to_string(), Scalar::Str(correction.corrected_target.clone()));
        metadata.insert("description".to_string(), Scalar::Str(input.description.to_string()));
        metadata.insert("url".to_string(), Scalar::Str(input.url.to_string()));
        metadata.insert("timestamp".to_string(), Scalar::Str(Utc::now().to_rfc3339()));
        metadata.insert(
            "source".to_string(),
            Scalar::Str(match correction.source {
                CorrectionSource::Cache => "cache",
                CorrectionSource::Deterministic => "deterministic",
                CorrectionSource::Llm => "llm",
            }.to_string()),
        );

        // Store failures are non-fatal for write-back (§4.2 failure semantics).
        if let Err(e) = self.store.store(&Uuid::new_v4().to_string(), &document, embedding, metadata).await {
            tracing::warn!(error = %e, "selector correction write-back failed");
        }
    }
}

fn deterministic_candidates(input: &ResolveInput<'_>) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(fragment) = plausible_text_fragment(input.description) {
        candidates.push(format!("text={fragment}"));
    }
    if let Some(noun) = dominant_noun_phrase(input.description) {
        candidates.push(format!("[aria-label={noun}]"));
    }
    if input.kind == StepKind::Type {
        if let Some(noun) = dominant_noun_phrase(input.description) {
            candidates.push(format!("[placeholder={noun}]"));
        }
    }
    candidates.push(format!("role=button[name={}]", dominant_noun_phrase(input.description).unwrap_or_default()));

    candidates
}

/// Pulls a quoted fragment out of the description ("Click the 'More info'
/// link" -> "More info"), falling back to the whole description sans
/// leading verb when nothing is quoted.
fn plausible_text_fragment(description: &str) -> Option<String> {
    if let Some(start) = description.find('\'').or_else(|| description.find('"')) {
        let quote = description.as_bytes()[start] as char;
        let rest = &description[start + 1..];
        if let Some(end) = rest.find(quote) {
            return Some(rest[..end].to_string());
        }
    }
    None
}

/// Crude dominant-noun-phrase heuristic: the longest capitalized run of
/// words, else the last word of the description.
fn dominant_noun_phrase(description: &str) -> Option<String> {
    let words: Vec<&str> = description.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let capitalized: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| w.chars().next().map_or(false, |c| c.is_uppercase()))
        .collect();
    if !capitalized.is_empty() {
        return Some(capitalized.join(" "));
    }
    words.last().map(|w| w.to_string())
}

fn element_resolves(snapshot: &[DomElement], candidate: &str) -> bool {
    let Ok(parsed) = locator::parse(candidate) else { return false };
    match parsed {
        locator::Locator::Text(text) => snapshot
            .iter()
            .any(|e| e.text.trim().eq_ignore_ascii_case(text.trim())),
        locator::Locator::Attribute { name, value } => snapshot.iter().any(|e| match name.as_str() {
            "aria-label" => e.aria_label.as_deref() == Some(value.as_str()),
            "placeholder" => e.placeholder.as_deref() == Some(value.as_str()),
            "href" => e.href.as_deref() == Some(value.as_str()),
            "id" => e.id.as_deref() == Some(value.as_str()),
            _ => false,
        }),
        locator::Locator::Role { role, name } => snapshot.iter().any(|e| {
            e.role == role && name.as_ref().map_or(true, |n| e.text.contains(n.as_str()))
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbeddingClient, MockLlmClient};
    use crate::store::InMemoryKnowledgeStore;

    fn input<'a>(snapshot: Vec<DomElement>) -> ResolveInput<'a> {
        ResolveInput {
            original_target: "a:contains('More information')",
            description: "Click the 'More information' link",
            kind: StepKind::Click,
            data: None,
            url: "https://example.com",
            snapshot,
        }
    }

    #[tokio::test]
    async fn cache_hit_on_exact_original_target_skips_llm() {
        let store = Arc::new(InMemoryKnowledgeStore::new(16));
        let llm = Arc::new(MockLlmClient::default());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));

        let mut metadata = Metadata::new();
        metadata.insert("type".into(), Scalar::Str("selector_correction".into()));
        metadata.insert("originalTarget".into(), Scalar::Str("a:contains('More information')".into()));
        metadata.insert("correctedTarget".into(), Scalar::Str("text=Learn more".into()));
        metadata.insert("description".into(), Scalar::Str("Click the 'More information' link".into()));
        let embedding = embedder.embed("selector correction: a:contains('More information') Click the 'More information' link").await.unwrap();
        store.store("seed-1", "seed", embedding, metadata).await.unwrap();

        let resolver = SelectorResolver::new(store, llm.clone(), embedder);
        let outcome = resolver.resolve(input(vec![])).await.unwrap();

        assert_eq!(outcome.corrected_target, "text=Learn more");
        assert_eq!(outcome.correction.source, CorrectionSource::Cache);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn deterministic_fallback_matches_quoted_text_in_snapshot() {
        let store = Arc::new(InMemoryKnowledgeStore::new(16));
        let llm = Arc::new(MockLlmClient::default());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));

        let snapshot = vec![DomElement { text: "More information".to_string(), ..Default::default() }];
        let resolver = SelectorResolver::new(store, llm.clone(), embedder);
        let outcome = resolver.resolve(input(snapshot)).await.unwrap();

        assert_eq!(outcome.correction.source, CorrectionSource::Deterministic);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn llm_fallback_used_when_cache_and_deterministic_miss() {
        let store = Arc::new(InMemoryKnowledgeStore::new(16));
        let llm = Arc::new(MockLlmClient::default().with_correction("text=Learn more", 0.9));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));

        let resolver = SelectorResolver::new(store, llm.clone(), embedder);
        let outcome = resolver.resolve(input(vec![])).await.unwrap();

        assert_eq!(outcome.corrected_target, "text=Learn more");
        assert_eq!(outcome.correction.source, CorrectionSource::Llm);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_not_resolvable() {
        let store = Arc::new(InMemoryKnowledgeStore::new(16));
        let llm = Arc::new(MockLlmClient::default());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));

        let resolver = SelectorResolver::new(store, llm, embedder);
        let result = resolver.resolve(input(vec![])).await;
        assert!(matches!(result, Err(None)));
    }
}
