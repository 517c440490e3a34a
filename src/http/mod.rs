//! HTTP surface (§6.4) — axum router over every other component. Grounded
//! on the `AppState` + `Router::new().route(...).with_state(state)` shape
//! from the NOVA-ALLRounder core's `api_server.rs`, generalized from its
//! desktop-GUI routes to this crate's run/suite/knowledge/trigger surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::errors::CoreError;
use crate::executor::{ExecuteOptions, PlanExecutor};
use crate::impact::ImpactAnalyser;
use crate::limits::CoreLimits;
use crate::llm::EmbeddingClient;
use crate::orchestrator::{SuiteExecutionOptions, SuiteOrchestrator};
use crate::protocol::{Plan, Run, Suite, Trigger};
use crate::status::LiveStatusTracker;
use crate::storage::Storage;
use crate::store::{KnowledgeStore, Metadata};
use crate::trigger::{DispatchError, TriggerDispatcher, VcsEvent};

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<PlanExecutor>,
    pub orchestrator: Arc<SuiteOrchestrator>,
    pub status: Arc<LiveStatusTracker>,
    pub store: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub impact: Arc<ImpactAnalyser>,
    pub triggers: Arc<TriggerDispatcher>,
    pub storage: Arc<Storage>,
    pub limits: CoreLimits,
    pub runs: Arc<DashMap<String, Run>>,
    pub suites: Arc<DashMap<String, Suite>>,
    pub plans: Arc<DashMap<String, Plan>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/runs", post(create_run))
        .route("/runs/:run_id", get(get_run))
        .route("/suites/:suite_id/run", post(run_suite))
        .route("/suites/:suite_id/status", get(suite_status))
        .route("/knowledge/store", post(knowledge_store))
        .route("/knowledge/query", post(knowledge_query))
        .route("/knowledge/similar/:run_id", get(knowledge_similar))
        .route("/knowledge/impact", post(knowledge_impact))
        .route("/triggers", get(list_triggers).post(create_trigger))
        .route("/triggers/:trigger_id", get(get_trigger).put(update_trigger).delete(delete_trigger))
        .route("/webhooks/:provider", post(webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(err: &CoreError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        CoreError::DriverAssertion { .. } | CoreError::DriverLocator { .. } => StatusCode::BAD_REQUEST,
        CoreError::Cancelled => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.code(), "message": err.user_message() })))
}

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    plan: Plan,
    #[serde(default)]
    options: Option<ExecuteOptions>,
}

#[derive(Debug, Serialize)]
struct CreateRunResponse {
    run_id: String,
}

async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<CreateRunResponse>), (StatusCode, Json<serde_json::Value>)> {
    if let Err(e) = crate::validation::validate_plan(&req.plan) {
        return Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "validation", "message": e.to_string() }))));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut options = req.options.unwrap_or_else(|| ExecuteOptions::from_plan(&req.plan, &state.limits));
    let plan = req.plan;
    let executor = Arc::clone(&state.executor);
    let runs = Arc::clone(&state.runs);
    let storage = Arc::clone(&state.storage);
    let run_id_for_task = run_id.clone();

    match storage.ensure_run_dir(&run_id).await {
        Ok(dir) => options.artifacts_dir = Some(dir),
        Err(e) => tracing::warn!(error = %e, run_id = %run_id, "failed to prepare run artifacts directory"),
    }

    tokio::spawn(async move {
        let run = executor.execute(run_id_for_task.clone(), &plan, options, None).await;
        if let Err(e) = storage.save_run_report(&run).await {
            tracing::warn!(error = %e, run_id = %run_id_for_task, "failed to persist run report");
        }
        runs.insert(run_id_for_task, run);
    });

    Ok((StatusCode::ACCEPTED, Json(CreateRunResponse { run_id })))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    if let Some(run) = state.runs.get(&run_id) {
        return (StatusCode::OK, Json(run.value().clone())).into_response();
    }
    match state.storage.load_run_report(&run_id).await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RunSuiteRequest {
    #[serde(default)]
    parallel: bool,
    #[serde(default = "default_max_concurrent")]
    max_concurrent: usize,
    #[serde(default)]
    plan_options: ExecuteOptions,
}

fn default_max_concurrent() -> usize {
    3
}

#[derive(Debug, Serialize)]
struct RunSuiteResponse {
    suite_run_id: String,
}

async fn run_suite(
    State(state): State<AppState>,
    Path(suite_id): Path<String>,
    Json(req): Json<RunSuiteRequest>,
) -> Result<(StatusCode, Json<RunSuiteResponse>), StatusCode> {
    if !state.suites.contains_key(&suite_id) {
        return Err(StatusCode::NOT_FOUND);
    }

    let suite_run_id = uuid::Uuid::new_v4().to_string();
    let suites: Vec<Suite> = state.suites.iter().map(|s| s.value().clone()).collect();
    let plans: HashMap<String, Plan> = state.plans.iter().map(|p| (p.key().clone(), p.value().clone())).collect();

    let orchestrator = Arc::clone(&state.orchestrator);
    let suite_id_for_task = suite_id.clone();

    tokio::spawn(async move {
        let options = SuiteExecutionOptions { parallel: req.parallel, max_concurrent: req.max_concurrent, plan_options: req.plan_options };
        let _runs = orchestrator.run_suite(&suite_id_for_task, &suites, &plans, options).await;
    });

    Ok((StatusCode::ACCEPTED, Json(RunSuiteResponse { suite_run_id })))
}

async fn suite_status(State(state): State<AppState>, Path(suite_id): Path<String>) -> impl IntoResponse {
    match state.status.snapshot(&suite_id).await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct KnowledgeStoreRequest {
    id: String,
    document: String,
    #[serde(default)]
    metadata: Metadata,
}

async fn knowledge_store(State(state): State<AppState>, Json(req): Json<KnowledgeStoreRequest>) -> impl IntoResponse {
    let embedding = match state.embedder.embed(&req.document).await {
        Ok(e) => e,
        Err(e) => return error_response(&e).into_response(),
    };
    match state.store.store(&req.id, &req.document, embedding, req.metadata).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct KnowledgeQueryRequest {
    query: String,
    #[serde(default = "default_k")]
    k: usize,
    #[serde(default)]
    filters: Option<Metadata>,
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct KnowledgeQueryResponse {
    hits: Vec<crate::store::Hit>,
    answer: String,
}

async fn knowledge_query(State(state): State<AppState>, Json(req): Json<KnowledgeQueryRequest>) -> impl IntoResponse {
    let embedding = match state.embedder.embed(&req.query).await {
        Ok(e) => e,
        Err(e) => return error_response(&e).into_response(),
    };
    match state.store.query(&embedding, req.k, req.filters.as_ref(), Some(&req.query)).await {
        Ok(hits) => {
            let answer = if hits.is_empty() {
                "no matching records".to_string()
            } else {
                format!("{} matching record(s); closest: {}", hits.len(), hits[0].document)
            };
            (StatusCode::OK, Json(KnowledgeQueryResponse { hits, answer })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

async fn knowledge_similar(State(state): State<AppState>, Path(run_id): Path<String>) -> impl IntoResponse {
    let Ok(Some((_, _, embedding))) = state.store.get(&run_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.store.query(&embedding, 5, None, None).await {
        Ok(hits) => (StatusCode::OK, Json(hits)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ImpactRequest {
    changed_files: Vec<String>,
    #[serde(default)]
    message: String,
}

async fn knowledge_impact(State(state): State<AppState>, Json(req): Json<ImpactRequest>) -> impl IntoResponse {
    let report = state.impact.analyse(&req.changed_files, &req.message).await;
    (StatusCode::OK, Json(report))
}

async fn list_triggers(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.triggers.list()))
}

async fn create_trigger(State(state): State<AppState>, Json(trigger): Json<Trigger>) -> impl IntoResponse {
    if state.triggers.get(&trigger.id).is_some() {
        return StatusCode::CONFLICT.into_response();
    }
    state.triggers.upsert(trigger.clone());
    if let Err(e) = state.storage.save_trigger(&trigger).await {
        tracing::warn!(error = %e, "failed to persist trigger");
    }
    (StatusCode::CREATED, Json(trigger)).into_response()
}

async fn get_trigger(State(state): State<AppState>, Path(trigger_id): Path<String>) -> impl IntoResponse {
    match state.triggers.get(&trigger_id) {
        Some(t) => (StatusCode::OK, Json(t)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_trigger(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Json(trigger): Json<Trigger>,
) -> impl IntoResponse {
    if state.triggers.get(&trigger_id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.triggers.upsert(trigger.clone());
    if let Err(e) = state.storage.save_trigger(&trigger).await {
        tracing::warn!(error = %e, "failed to persist trigger");
    }
    (StatusCode::OK, Json(trigger)).into_response()
}

async fn delete_trigger(State(state): State<AppState>, Path(trigger_id): Path<String>) -> impl IntoResponse {
    if state.triggers.get(&trigger_id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.triggers.remove(&trigger_id);
    if let Err(e) = state.storage.delete_trigger(&trigger_id).await {
        tracing::warn!(error = %e, "failed to delete persisted trigger");
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    branch: String,
    #[serde(default)]
    changed_files: Vec<String>,
    #[serde(default)]
    commit_message: String,
    commit_sha: String,
}

async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(payload): Json<WebhookPayload>,
) -> impl IntoResponse {
    let event = VcsEvent {
        branch: payload.branch,
        changed_files: payload.changed_files,
        commit_message: payload.commit_message,
        commit_sha: payload.commit_sha,
    };
    tracing::info!(provider, branch = %event.branch, "received webhook");
    match state.triggers.dispatch_vcs_event(&event).await {
        Ok(dispatched) => (StatusCode::OK, Json(serde_json::json!({ "dispatched": dispatched.len() }))).into_response(),
        Err(DispatchError::QueueFull) => StatusCode::TOO_MANY_REQUESTS.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    knowledge_record_count: u64,
    queue_high_water_mark: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.store.count().await.unwrap_or(0);
    (
        StatusCode::OK,
        Json(HealthResponse { status: "ok", knowledge_record_count: count, queue_high_water_mark: state.triggers.queue_high_water_mark() }),
    )
}

/// Drains dispatched trigger runs and drives them through the same
/// flatten-and-run path `POST /suites/{suiteId}/run` uses. Runs for the
/// lifetime of the process; intended to be spawned once at startup.
pub async fn run_trigger_worker(state: AppState, mut receiver: tokio::sync::mpsc::Receiver<crate::trigger::DispatchedRun>) {
    while let Some(dispatched) = receiver.recv().await {
        let suites: Vec<Suite> = state.suites.iter().map(|s| s.value().clone()).collect();
        let plans: HashMap<String, Plan> = state.plans.iter().map(|p| (p.key().clone(), p.value().clone())).collect();

        tracing::info!(trigger_id = %dispatched.trigger_id, suite_id = %dispatched.suite_id, "running triggered suite");
        let options = SuiteExecutionOptions { parallel: false, max_concurrent: 1, plan_options: ExecuteOptions::default() };
        let _runs = state.orchestrator.run_suite(&dispatched.suite_id, &suites, &plans, options).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::analyser::FailureAnalyser;
    use crate::driver::mock::MockBrowserDriver;
    use crate::driver::BrowserDriver;
    use crate::llm::{EmbeddingClient, LlmClient, MockEmbeddingClient, MockLlmClient};
    use crate::resolver::SelectorResolver;
    use crate::store::{InMemoryKnowledgeStore, KnowledgeStore};

    use super::*;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new(8));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(8));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::default());
        let driver: Arc<dyn BrowserDriver> = Arc::new(MockBrowserDriver::new());

        let resolver = Arc::new(SelectorResolver::new(store.clone(), llm.clone(), embedder.clone()));
        let analyser = Arc::new(FailureAnalyser::new(store.clone(), llm.clone(), embedder.clone()));
        let executor = Arc::new(PlanExecutor::new(driver, resolver, analyser, store.clone(), embedder.clone(), CoreLimits::default()));
        let status = Arc::new(LiveStatusTracker::new(Duration::from_secs(60)));
        let orchestrator = Arc::new(SuiteOrchestrator::new(executor.clone(), status.clone(), storage.clone()));
        let impact = Arc::new(ImpactAnalyser::new(store.clone(), llm.clone(), embedder.clone()));
        let (dispatcher, _receiver) = TriggerDispatcher::new(10);

        let state = AppState {
            executor,
            orchestrator,
            status,
            store,
            embedder,
            impact,
            triggers: Arc::new(dispatcher),
            storage,
            limits: CoreLimits::default(),
            runs: Arc::new(DashMap::new()),
            suites: Arc::new(DashMap::new()),
            plans: Arc::new(DashMap::new()),
        };
        (state, dir)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_suite_status_is_not_found() {
        let (state, _dir) = test_state();
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/suites/missing/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_fetch_trigger_round_trips() {
        let (state, _dir) = test_state();
        let app = router(state);

        let trigger = serde_json::json!({
            "id": "t1",
            "enabled": true,
            "trigger_type": "push",
            "match_conditions": { "branch_globs": ["main"], "file_globs": [], "skip_globs": [] },
            "target_suite_ids": ["s1"],
            "execution_options": { "parallel": false },
            "stats": {}
        });

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/triggers")
                    .header("content-type", "application/json")
                    .body(Body::from(trigger.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);

        let get = app
            .oneshot(Request::builder().uri("/triggers/t1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
    }
}
