//! Knowledge Store (C2) — a vector index over execution records and
//! selector corrections, with a scalar-metadata side channel for filtering.
//!
//! No crate in the retrieval pack implements a vector store directly (the
//! closest, `NOVA-ALLRounder`, pulls in `lancedb`/`arrow`, a heavier stack
//! than anything else this crate depends on). [`InMemoryKnowledgeStore`]
//! is hand-rolled on `dashmap` instead — the same concurrent-map crate
//! `oldnordic-odincode` and `mofa-org-mofa` reach for — doing a linear scan
//! with manual cosine similarity per query. That is the right tradeoff at
//! the scale this core targets (thousands, not millions, of execution
//! records per process) and keeps the dependency footprint aligned with the
//! rest of the corpus.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

pub type Metadata = HashMap<String, Scalar>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Aggregate {
    pub total: u64,
    pub by_test_type: HashMap<String, u64>,
    pub by_browser: HashMap<String, u64>,
    pub passed: u64,
    pub failed: u64,
    pub average_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<DateTime<Utc>>,
}

/// Vector-indexed storage of execution records and selector corrections
/// (§4.2). `store`/`query`/`get` must be safe for concurrent callers; a
/// single `store` is atomic per id.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn store(
        &self,
        id: &str,
        document: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), CoreError>;

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        scalar_filter: Option<&Metadata>,
        text_filter: Option<&str>,
    ) -> Result<Vec<Hit>, CoreError>;

    async fn get(&self, id: &str) -> Result<Option<(String, Metadata, Vec<f32>)>, CoreError>;

    async fn count(&self) -> Result<u64, CoreError>;

    async fn aggregate(&self) -> Result<Aggregate, CoreError>;
}

struct Entry {
    document: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// `dashmap`-backed in-memory implementation. `dimensions` is fixed at
/// construction and never revalidated against stored vectors — callers must
/// not mix embedding models mid-lifetime (§4.2).
pub struct InMemoryKnowledgeStore {
    dimensions: usize,
    entries: DashMap<String, Entry>,
}

impl InMemoryKnowledgeStore {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, entries: DashMap::new() }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine_distance = 1.0 - (dot / (norm_a * norm_b));
    (1.0 - cosine_distance as f64).clamp(0.0, 1.0)
}

fn matches_scalar_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn store(
        &self,
        id: &str,
        document: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), CoreError> {
        if embedding.len() != self.dimensions {
            return Err(CoreError::Internal(format!(
                "embedding has {} dimensions, store expects {}",
                embedding.len(),
                self.dimensions
            )));
        }
        self.entries.insert(
            id.to_string(),
            Entry { document: document.to_string(), metadata, embedding },
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        scalar_filter: Option<&Metadata>,
        text_filter: Option<&str>,
    ) -> Result<Vec<Hit>, CoreError> {
        let mut hits: Vec<Hit> = self
            .entries
            .iter()
            .filter(|entry| scalar_filter.map_or(true, |f| matches_scalar_filter(&entry.metadata, f)))
            .filter(|entry| {
                text_filter.map_or(true, |needle| {
                    entry.document.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .map(|entry| Hit {
                id: entry.key().clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                similarity: cosine_similarity(embedding, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<(String, Metadata, Vec<f32>)>, CoreError> {
        Ok(self
            .entries
            .get(id)
            .map(|e| (e.document.clone(), e.metadata.clone(), e.embedding.clone())))
    }

    async fn count(&self) -> Result<u64, CoreError> {
        Ok(self.entries.len() as u64)
    }

    async fn aggregate(&self) -> Result<Aggregate, CoreError> {
        let mut agg = Aggregate::default();
        let mut total_duration = 0u64;
        let mut duration_samples = 0u64;

        for entry in self.entries.iter() {
            agg.total += 1;
            if let Some(Scalar::Str(test_type)) = entry.metadata.get("testType") {
                *agg.by_test_type.entry(test_type.clone()).or_insert(0) += 1;
            }
            if let Some(Scalar::Str(browser)) = entry.metadata.get("browser") {
                *agg.by_browser.entry(browser.clone()).or_insert(0) += 1;
            }
            match entry.metadata.get("success") {
                Some(Scalar::Bool(true)) => agg.passed += 1,
                Some(Scalar::Bool(false)) => agg.failed += 1,
                _ => {}
            }
            if let Some(duration) = entry.metadata.get("durationMs") {
                let ms = match duration {
                    Scalar::Int(n) => Some(*n as u64),
                    Scalar::Float(f) => Some(*f as u64),
                    _ => None,
                };
                if let Some(ms) = ms {
                    total_duration += ms;
                    duration_samples += 1;
                }
            }
            if let Some(Scalar::Str(ts)) = entry.metadata.get("timestamp") {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
                    let parsed = parsed.with_timezone(&Utc);
                    agg.earliest = Some(agg.earliest.map_or(parsed, |e| e.min(parsed)));
                    agg.latest = Some(agg.latest.map_or(parsed, |l| l.max(parsed)));
                }
            }
        }

        agg.average_duration_ms = if duration_samples > 0 {
            total_duration as f64 / duration_samples as f64
        } else {
            0.0
        };

        Ok(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, Scalar)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn store_then_get_round_trips_modulo_embedding() {
        let store = InMemoryKnowledgeStore::new(4);
        let metadata = meta(&[("type", Scalar::Str("selector_correction".into()))]);
        store.store("id-1", "doc text", vec![0.1, 0.2, 0.3, 0.4], metadata.clone()).await.unwrap();

        let (document, got_meta, embedding) = store.get("id-1").await.unwrap().unwrap();
        assert_eq!(document, "doc text");
        assert_eq!(got_meta, metadata);
        assert_eq!(embedding.len(), 4);
    }

    #[tokio::test]
    async fn query_ranks_exact_match_first() {
        let store = InMemoryKnowledgeStore::new(3);
        store.store("a", "doc a", vec![1.0, 0.0, 0.0], Metadata::new()).await.unwrap();
        store.store("b", "doc b", vec![0.0, 1.0, 0.0], Metadata::new()).await.unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 2, None, None).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].similarity >= 0.95);
    }

    #[tokio::test]
    async fn query_applies_scalar_filter() {
        let store = InMemoryKnowledgeStore::new(2);
        store
            .store("a", "doc a", vec![1.0, 0.0], meta(&[("type", Scalar::Str("selector_correction".into()))]))
            .await
            .unwrap();
        store
            .store("b", "doc b", vec![1.0, 0.0], meta(&[("type", Scalar::Str("failure_analysis".into()))]))
            .await
            .unwrap();

        let filter = meta(&[("type", Scalar::Str("selector_correction".into()))]);
        let hits = store.query(&[1.0, 0.0], 10, Some(&filter), None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn aggregate_computes_pass_fail_and_average_duration() {
        let store = InMemoryKnowledgeStore::new(1);
        store
            .store("a", "d", vec![0.0], meta(&[("success", Scalar::Bool(true)), ("durationMs", Scalar::Int(100))]))
            .await
            .unwrap();
        store
            .store("b", "d", vec![0.0], meta(&[("success", Scalar::Bool(false)), ("durationMs", Scalar::Int(300))]))
            .await
            .unwrap();

        let agg = store.aggregate().await.unwrap();
        assert_eq!(agg.passed, 1);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.average_duration_ms, 200.0);
    }

    #[tokio::test]
    async fn mismatched_embedding_dimension_is_rejected() {
        let store = InMemoryKnowledgeStore::new(4);
        let err = store.store("a", "d", vec![1.0, 2.0], Metadata::new()).await.unwrap_err();
        assert_eq!(err.code(), "internal");
    }
}
