//! Top-level configuration (§6.5) — one object aggregating everything the
//! binary needs to start: LLM/embedding endpoints, [`CoreLimits`], the HTTP
//! port, the storage root, and [`TelemetryConfig`]. Follows the same
//! `from_env`-with-conservative-defaults shape as [`crate::telemetry::TelemetryConfig`]
//! and [`CoreLimits::from_env`].

use crate::limits::CoreLimits;
use crate::telemetry::TelemetryConfig;

fn default_http_port() -> u16 {
    8080
}

fn default_storage_root() -> String {
    "./data".to_string()
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Required: the LLM provider API key (§6.5). Empty string if unset,
    /// so a misconfigured deployment fails fast at the LLM client boundary
    /// rather than here.
    pub llm_api_key: String,
    /// Required: the embedding endpoint used by the Knowledge Store / Selector Resolver.
    pub embedding_endpoint: String,
    pub http_port: u16,
    pub storage_root: String,
    pub limits: CoreLimits,
    pub telemetry: TelemetryConfig,
}

impl CoreConfig {
    /// Reads `E2E_LLM_API_KEY`, `E2E_EMBEDDING_ENDPOINT`, `E2E_HTTP_PORT`,
    /// `E2E_STORAGE_ROOT`, plus whatever [`CoreLimits::from_env`] and
    /// [`TelemetryConfig::from_env`] read under their own variable names.
    pub fn from_env() -> Self {
        let llm_api_key = std::env::var("E2E_LLM_API_KEY").unwrap_or_default();
        let embedding_endpoint = std::env::var("E2E_EMBEDDING_ENDPOINT").unwrap_or_default();
        let http_port = std::env::var("E2E_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_http_port);
        let storage_root = std::env::var("E2E_STORAGE_ROOT").unwrap_or_else(|_| default_storage_root());

        Self {
            llm_api_key,
            embedding_endpoint,
            http_port,
            storage_root,
            limits: CoreLimits::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        let config = CoreConfig { http_port: default_http_port(), storage_root: default_storage_root(), ..CoreConfig::from_env() };
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.storage_root, "./data");
    }
}
