//! Binary entry point. `Commands` is kept as the CLI's argument surface
//! (`serve --port`, `--storage-root`, `--otel`) the way the teacher's runner
//! kept `Execute{file,output,...}` — the binary just starts the HTTP surface
//! (§6.4) instead of executing one plan and exiting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dashmap::DashMap;
use tracing::{info, Level};

use e2e_test_core::config::CoreConfig;
use e2e_test_core::driver::fantoccini_driver::FantocciniDriver;
use e2e_test_core::driver::mock::MockBrowserDriver;
use e2e_test_core::driver::BrowserDriver;
use e2e_test_core::analyser::FailureAnalyser;
use e2e_test_core::executor::PlanExecutor;
use e2e_test_core::http::{self, AppState};
use e2e_test_core::impact::ImpactAnalyser;
use e2e_test_core::llm::{
    EmbeddingClient, HttpEmbeddingClient, HttpLlmClient, LlmClient, MockEmbeddingClient, MockLlmClient,
};
use e2e_test_core::orchestrator::SuiteOrchestrator;
use e2e_test_core::resolver::SelectorResolver;
use e2e_test_core::status::LiveStatusTracker;
use e2e_test_core::storage::Storage;
use e2e_test_core::store::{InMemoryKnowledgeStore, KnowledgeStore};
use e2e_test_core::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use e2e_test_core::trigger::TriggerDispatcher;

#[derive(Parser)]
#[command(name = "e2e-core")]
#[command(about = "AI-assisted end-to-end browser test automation core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the HTTP surface: run/suite dispatch, the Knowledge Store API,
    /// and trigger/webhook ingestion.
    Serve {
        /// Overrides `E2E_HTTP_PORT`.
        #[arg(long)]
        port: Option<u16>,

        /// Overrides `E2E_STORAGE_ROOT`.
        #[arg(long)]
        storage_root: Option<PathBuf>,

        /// WebDriver endpoint (e.g. `http://localhost:9515`). Without this
        /// the core runs against `MockBrowserDriver` — useful for exercising
        /// the HTTP surface and trigger plumbing without a real browser.
        #[arg(long)]
        webdriver_url: Option<String>,

        /// Embedding vector width when no embedding endpoint is configured.
        #[arg(long, default_value = "32")]
        mock_embedding_dimensions: usize,

        #[arg(long, default_value = "false")]
        otel: bool,

        #[arg(long)]
        otel_endpoint: Option<String>,

        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, storage_root, webdriver_url, mock_embedding_dimensions, otel, otel_endpoint, verbose } => {
            let mut config = CoreConfig::from_env();
            if let Some(port) = port {
                config.http_port = port;
            }
            if let Some(root) = storage_root {
                config.storage_root = root.to_string_lossy().into_owned();
            }
            if verbose {
                config.telemetry.log_level = Level::DEBUG;
            }
            if otel {
                if let Some(endpoint) = otel_endpoint {
                    config.telemetry.otlp_endpoint = Some(endpoint);
                } else if config.telemetry.otlp_endpoint.is_none() {
                    config.telemetry.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            let tracer = init_telemetry(config.telemetry.clone())?;
            let result = serve(config, webdriver_url, mock_embedding_dimensions).await;

            shutdown_telemetry();
            drop(tracer);
            result
        }
    }
}

async fn serve(config: CoreConfig, webdriver_url: Option<String>, mock_embedding_dimensions: usize) -> anyhow::Result<()> {
    let storage = Arc::new(Storage::new(config.storage_root.clone()));
    let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new(mock_embedding_dimensions));

    let embedder: Arc<dyn EmbeddingClient> = if config.embedding_endpoint.is_empty() {
        info!("no embedding endpoint configured, using deterministic mock embedder");
        Arc::new(MockEmbeddingClient::new(mock_embedding_dimensions))
    } else {
        Arc::new(HttpEmbeddingClient::new(
            config.llm_api_key.clone(),
            config.embedding_endpoint.clone(),
            "text-embedding-3-small",
            mock_embedding_dimensions,
        )?)
    };

    let llm: Arc<dyn LlmClient> = if config.llm_api_key.is_empty() {
        info!("no LLM API key configured, using mock LLM client");
        Arc::new(MockLlmClient::default())
    } else {
        Arc::new(HttpLlmClient::new(config.llm_api_key.clone(), "https://api.openai.com/v1", "gpt-4o-mini")?)
    };

    let driver: Arc<dyn BrowserDriver> = match webdriver_url {
        Some(url) => {
            info!(webdriver_url = %url, "connecting to WebDriver endpoint");
            Arc::new(FantocciniDriver::connect(&url, Duration::from_secs(30)).await?)
        }
        None => {
            info!("no webdriver url configured, using mock browser driver");
            Arc::new(MockBrowserDriver::new())
        }
    };

    let resolver = Arc::new(SelectorResolver::new(store.clone(), llm.clone(), embedder.clone()));
    let analyser = Arc::new(FailureAnalyser::new(store.clone(), llm.clone(), embedder.clone()));
    let executor = Arc::new(PlanExecutor::new(driver, resolver, analyser, store.clone(), embedder.clone(), config.limits.clone()));
    let status = Arc::new(LiveStatusTracker::new(config.limits.live_status_ttl));
    let orchestrator = Arc::new(SuiteOrchestrator::new(executor.clone(), status.clone(), storage.clone()));
    let impact = Arc::new(ImpactAnalyser::new(store.clone(), llm.clone(), embedder.clone()));
    let (dispatcher, receiver) = TriggerDispatcher::new(config.limits.trigger_queue_high_water_mark);
    let triggers = Arc::new(dispatcher);

    let state = AppState {
        executor,
        orchestrator,
        status,
        store,
        embedder,
        impact,
        triggers,
        storage,
        limits: config.limits.clone(),
        runs: Arc::new(DashMap::new()),
        suites: Arc::new(DashMap::new()),
        plans: Arc::new(DashMap::new()),
    };

    tokio::spawn(http::run_trigger_worker(state.clone(), receiver));

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
