//! `reqwest`-backed [`LlmClient`]/[`EmbeddingClient`] implementations.
//!
//! Grounded on the `LLMClient` in NOVA-ALLRounder's `llm_gateway.rs`: a
//! bearer-authenticated `reqwest::Client`, JSON-mode chat completions, and a
//! retry loop on 5xx/429. The retry loop itself reuses [`crate::retry::backoff`]
//! instead of hand-rolling exponential backoff again.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::errors::CoreError;
use crate::retry;

use super::{
    AnalysisRequest, AnalysisResponse, CorrectionRequest, CorrectionResponse, EmbeddingClient,
    ImpactConsolidationRequest, ImpactConsolidationResponse, LlmClient,
};

const MAX_ATTEMPTS: u32 = 3;

pub struct HttpLlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Internal(format!("building http client: {e}")))?;
        Ok(Self { client, api_key: api_key.into(), base_url: base_url.into(), model: model.into() })
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<Value, CoreError> {
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let payload: Value = resp.json().await.map_err(|e| CoreError::LlmSchema(e.to_string()))?;
                    let content = payload["choices"][0]["message"]["content"]
                        .as_str()
                        .ok_or_else(|| CoreError::LlmSchema("missing choices[0].message.content".to_string()))?;
                    return serde_json::from_str(content).map_err(|e| CoreError::LlmSchema(e.to_string()));
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(CoreError::LlmTransient(format!("status {}", resp.status())));
                    }
                }
                Ok(resp) => return Err(CoreError::LlmSchema(format!("unexpected status {}", resp.status()))),
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(CoreError::LlmTransient(e.to_string()));
                    }
                }
            }
            tokio::time::sleep(retry::backoff(attempt)).await;
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn propose_selector_correction(&self, request: CorrectionRequest) -> Result<CorrectionResponse, CoreError> {
        let system = "You repair a broken CSS/XPath selector given the page's interactive elements. \
            Respond with JSON matching {\"locator\": string, \"confidence\": number between 0 and 1}.";
        let user = serde_json::to_string(&request).map_err(|e| CoreError::Internal(e.to_string()))?;
        let value = self.chat_json(system, &user).await?;
        serde_json::from_value(value).map_err(|e| CoreError::LlmSchema(e.to_string()))
    }

    async fn analyse_failure(&self, request: AnalysisRequest) -> Result<AnalysisResponse, CoreError> {
        let system = "You diagnose why a browser test step failed. Respond with JSON matching \
            {\"understood\": bool, \"intent\": string, \"possible_causes\": [string], \
            \"suggested_fixes\": [string], \"confidence\": number, \"reasoning\": string}.";
        let user = serde_json::to_string(&request).map_err(|e| CoreError::Internal(e.to_string()))?;
        let value = self.chat_json(system, &user).await?;
        serde_json::from_value(value).map_err(|e| CoreError::LlmSchema(e.to_string()))
    }

    async fn consolidate_impact(&self, request: ImpactConsolidationRequest) -> Result<ImpactConsolidationResponse, CoreError> {
        let system = "You rank which test plans are worth re-running given a code change. \
            Respond with JSON matching {\"recommended_plans\": [{\"plan_id\": string, \"priority\": string, \
            \"reason\": string}], \"summary_recommendation\": string}.";
        let user = serde_json::to_string(&request).map_err(|e| CoreError::Internal(e.to_string()))?;
        let value = self.chat_json(system, &user).await?;
        serde_json::from_value(value).map_err(|e| CoreError::LlmSchema(e.to_string()))
    }
}

pub struct HttpEmbeddingClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Internal(format!("building http client: {e}")))?;
        Ok(Self { client, api_key: api_key.into(), base_url: base_url.into(), model: model.into(), dimensions })
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let body = json!({ "model": self.model, "input": text });
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let payload: Value = resp.json().await.map_err(|e| CoreError::LlmSchema(e.to_string()))?;
                    let embedding = payload["data"][0]["embedding"]
                        .as_array()
                        .ok_or_else(|| CoreError::LlmSchema("missing data[0].embedding".to_string()))?
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect();
                    return Ok(embedding);
                }
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(CoreError::LlmTransient(format!("status {}", resp.status())));
                    }
                }
                Ok(resp) => return Err(CoreError::LlmSchema(format!("unexpected status {}", resp.status()))),
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(CoreError::LlmTransient(e.to_string()));
                    }
                }
            }
            tokio::time::sleep(retry::backoff(attempt)).await;
        }
    }
}
