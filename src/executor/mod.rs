//! Plan Executor (C5) — the core of the core. Drives a [`Plan`] through
//! [`BrowserDriver`] one step at a time, with per-step retry, auto-heal via
//! the Selector Resolver (C3), screenshot-on-failure, and a Failure
//! Analyser (C4) pass on terminal failure. Persists an [`ExecutionRecord`]
//! to the Knowledge Store (C2) when the Run ends.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analyser::{AnalyseInput, FailureAnalyser};
use crate::driver::{AssertionOutcome, BrowserDriver, DriverEvent, WaitState, WaitUntil};
use crate::errors::CoreError;
use crate::limits::CoreLimits;
use crate::llm::EmbeddingClient;
use crate::protocol::{
    Assertion, ConsoleEntry, ExecutionRecord, FailureAnalysis, NetworkEntry, Plan, Run, RunOutcome,
    Step, StepCapture, StepKind, StepResult, StepStatus,
};
use crate::resolver::{ResolveInput, SelectorResolver};
use crate::store::{KnowledgeStore, Metadata, Scalar};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOptions {
    pub headless: bool,
    pub continue_on_failure: bool,
    pub auto_heal: bool,
    pub default_step_timeout_ms: u64,
    pub max_step_retries: u32,
    /// Directory `step_<ordinal>_failure_<timestamp>.png` screenshots are
    /// written into. `None` skips screenshot capture entirely (tests).
    pub artifacts_dir: Option<PathBuf>,
}

impl ExecuteOptions {
    pub fn from_plan(plan: &Plan, limits: &CoreLimits) -> Self {
        Self {
            headless: plan.options.headless.unwrap_or(true),
            continue_on_failure: plan.options.continue_on_failure.unwrap_or(false),
            auto_heal: plan.options.auto_heal.unwrap_or(true),
            default_step_timeout_ms: plan.options.default_timeout_ms.unwrap_or(10_000),
            max_step_retries: plan.options.max_step_retries.unwrap_or(limits.max_step_retries),
            artifacts_dir: None,
        }
    }
}

/// Emitted once per state transition; the live-log requirement of §4.4
/// ("stepStart, stepFail, stepPass, correctionApplied, runEnd") and the hook
/// C6/C7 subscribe to for Live Suite State updates.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    StepStart { ordinal: u32 },
    StepPass { ordinal: u32 },
    CorrectionApplied { ordinal: u32, corrected_target: String },
    StepFail { ordinal: u32, error_kind: String },
    RunEnd { outcome: RunOutcome },
}

/// Unlike the teacher's synchronous progress callbacks, this sink's return
/// value is awaited in-line — the Live-Status Tracker's updates are `async`,
/// and a fire-and-forget `tokio::spawn` here could land a `test_step` after
/// `test_end`/`suite_end` already ran, corrupting Live Suite State ordering.
pub type EventSink = Arc<dyn Fn(ExecutionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct PlanExecutor {
    driver: Arc<dyn BrowserDriver>,
    resolver: Arc<SelectorResolver>,
    analyser: Arc<FailureAnalyser>,
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingClient>,
    limits: CoreLimits,
}

impl PlanExecutor {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        resolver: Arc<SelectorResolver>,
        analyser: Arc<FailureAnalyser>,
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingClient>,
        limits: CoreLimits,
    ) -> Self {
        Self { driver, resolver, analyser, store, embedder, limits }
    }

    /// `run_id` is supplied by the caller rather than generated here so that
    /// an artifacts directory prepared ahead of time (`Storage::ensure_run_dir`)
    /// and the Run this executes agree on the same id.
    pub async fn execute(&self, run_id: String, plan: &Plan, options: ExecuteOptions, events: Option<EventSink>) -> Run {
        let mut run = Run::with_id(run_id, plan.id.clone());

        // Drop whatever accumulated before this Run started so it doesn't
        // bleed into the first step's capture window.
        let _ = self.driver.drain_events().await;

        let first_url = match tokio::time::timeout(
            self.limits.run_timeout,
            self.run_steps(plan, &options, &events, &mut run),
        )
        .await
        {
            Ok(first_url) => first_url,
            Err(_) => {
                tracing::warn!(plan_id = %plan.id, timeout = ?self.limits.run_timeout, "run exceeded its deadline, cancelling remaining steps");
                for step in plan.steps.iter().skip(run.step_results.len()) {
                    run.step_results.push(cancelled_result(step));
                }
                None
            }
        };

        run.assertions_summary.passed = run.passed_count();
        run.assertions_summary.failed = run.failed_count();
        run.outcome = Some(if run.failed_count() > 0 { RunOutcome::Failed } else { RunOutcome::Passed });
        run.ended_at = Some(Utc::now());

        if let Err(e) = self.driver.close().await {
            tracing::warn!(error = %e, "driver close failed during teardown");
        }

        self.persist_execution_record(plan, &run, first_url).await;

        if let Some(sink) = &events {
            sink(ExecutionEvent::RunEnd { outcome: run.outcome.unwrap() }).await;
        }

        run
    }

    /// Drives `plan.steps` to completion or until `execute`'s surrounding
    /// deadline fires. Returns the first `navigate` step's target, used to
    /// render the execution record's `URL:` line.
    async fn run_steps(
        &self,
        plan: &Plan,
        options: &ExecuteOptions,
        events: &Option<EventSink>,
        run: &mut Run,
    ) -> Option<String> {
        let mut skip_remaining = false;
        let mut first_url: Option<String> = None;

        for step in &plan.steps {
            if skip_remaining {
                run.step_results.push(skipped_result(step));
                continue;
            }

            if let Some(sink) = events {
                sink(ExecutionEvent::StepStart { ordinal: step.ordinal }).await;
            }

            if step.kind == StepKind::Navigate && first_url.is_none() {
                first_url = Some(step.target.clone());
            }

            let (result, analysis) = self.run_step(step, options, &plan.id).await;

            if let Some(sink) = events {
                match result.status {
                    StepStatus::Passed => sink(ExecutionEvent::StepPass { ordinal: step.ordinal }).await,
                    StepStatus::Failed => {
                        sink(ExecutionEvent::StepFail {
                            ordinal: step.ordinal,
                            error_kind: result.error_kind.clone().unwrap_or_default(),
                        })
                        .await
                    }
                    StepStatus::Skipped => {}
                }
                if let Some(correction) = &result.correction {
                    sink(ExecutionEvent::CorrectionApplied {
                        ordinal: step.ordinal,
                        corrected_target: correction.corrected_target.clone(),
                    })
                    .await;
                }
            }

            if let Some(screenshot) = &result.screenshot_ref {
                run.artifacts.screenshots.push(screenshot.clone());
            }

            let failed = result.status == StepStatus::Failed;
            run.step_results.push(result);

            if let Some(analysis) = analysis {
                if run.failure_analysis.is_none() {
                    run.failure_analysis = Some(analysis);
                }
            }

            if failed && !options.continue_on_failure {
                skip_remaining = true;
            }
        }

        first_url
    }

    /// Runs one step to completion (pass or terminal fail). Returns the
    /// [`StepResult`] plus a [`FailureAnalysis`] when the step failed
    /// terminally.
    async fn run_step(
        &self,
        step: &Step,
        options: &ExecuteOptions,
        plan_id: &str,
    ) -> (StepResult, Option<FailureAnalysis>) {
        let step_started_at = Utc::now();
        let mut current_target = step.target.clone();
        let mut correction = None;
        let mut flake_retries: u32 = 0;
        let mut total_attempts: u32 = 0;
        let mut last_error: Option<CoreError> = None;
        let mut actual_text = String::new();

        loop {
            total_attempts += 1;
            match self.dispatch(step, &current_target).await {
                Ok(text) => {
                    actual_text = text;
                    last_error = None;
                    break;
                }
                // Locator errors trigger auto-heal without consuming a
                // flake-retry attempt (§4.5) — the correction retry and the
                // flake-retry budget are orthogonal.
                Err(e) if e.is_locator_error() && options.auto_heal => match self.heal(step, &current_target).await {
                    Ok(outcome) => {
                        current_target = outcome.corrected_target;
                        correction = Some(outcome.correction);
                        continue;
                    }
                    Err(_) => {
                        last_error = Some(CoreError::DriverLocator {
                            target: current_target.clone(),
                            message: "locator_unresolvable".to_string(),
                        });
                        break;
                    }
                },
                Err(e) if e.is_retryable() && flake_retries < options.max_step_retries => {
                    flake_retries += 1;
                    tokio::time::sleep(crate::retry::backoff(flake_retries - 1)).await;
                    continue;
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let duration_ms = (Utc::now() - step_started_at).num_milliseconds().max(0) as u64;
        let capture = self.capture_window().await;
        let expected_text = step.expected.as_ref().map(Assertion::describe).unwrap_or_default();

        let Some(error) = last_error else {
            return (
                StepResult {
                    ordinal: step.ordinal,
                    status: StepStatus::Passed,
                    attempts: total_attempts,
                    duration_ms,
                    expected_text,
                    actual_text,
                    correction,
                    error_kind: None,
                    error_message: None,
                    screenshot_ref: None,
                    capture,
                },
                None,
            );
        };

        let error_kind = if matches!(error, CoreError::DriverLocator { .. }) {
            "locator_unresolvable".to_string()
        } else {
            error.code().to_string()
        };
        let error_message = error.user_message();
        let screenshot_ref = self.capture_failure_screenshot(step.ordinal, options).await;
        let current_url = self.driver.current_url().await.unwrap_or_default();
        let page_title = self.driver.title().await.unwrap_or_default();

        let analysis = self
            .analyser
            .analyse(AnalyseInput {
                test_id: plan_id,
                step,
                error_kind: &error_kind,
                error_message: &error_message,
                current_url: &current_url,
                page_title: &page_title,
            })
            .await;

        (
            StepResult {
                ordinal: step.ordinal,
                status: StepStatus::Failed,
                attempts: total_attempts,
                duration_ms,
                expected_text,
                actual_text: error_message.clone(),
                correction,
                error_kind: Some(error_kind),
                error_message: Some(error_message),
                screenshot_ref,
                capture,
            },
            Some(analysis),
        )
    }

    async fn dispatch(&self, step: &Step, target: &str) -> Result<String, CoreError> {
        match step.kind {
            StepKind::Navigate => {
                self.driver.navigate(target, WaitUntil::Load).await?;
                Ok(format!("navigated to {target}"))
            }
            StepKind::Click => {
                self.driver.click(target).await?;
                Ok("clicked".to_string())
            }
            StepKind::Hover => {
                self.driver.hover(target).await?;
                Ok("hovered".to_string())
            }
            StepKind::Type => {
                let text = step.data.as_deref().unwrap_or("");
                self.driver.type_text(target, text, true).await?;
                Ok(format!("typed '{text}'"))
            }
            StepKind::Select => {
                let value = step.data.as_deref().unwrap_or("");
                self.driver.select(target, value).await?;
                Ok(format!("selected '{value}'"))
            }
            // `target` carries the key name for press steps; there is no
            // separate locator, so nothing for the resolver to auto-heal.
            StepKind::Press => {
                self.driver.press(target).await?;
                Ok(format!("pressed {target}"))
            }
            // `data` carries the WaitState keyword (visible/hidden/attached);
            // defaults to visible when absent.
            StepKind::Wait => {
                let state = match step.data.as_deref() {
                    Some("hidden") => WaitState::Hidden,
                    Some("attached") => WaitState::Attached,
                    _ => WaitState::Visible,
                };
                self.driver.wait(target, state, 10_000).await?;
                Ok("wait condition met".to_string())
            }
            StepKind::Assert => {
                let expected = step.expected.as_ref().ok_or_else(|| {
                    CoreError::Internal(format!("step {} has kind=assert without expected", step.ordinal))
                })?;
                let AssertionOutcome { passed, actual_value } = self.driver.assert(expected, target).await?;
                if passed {
                    Ok(actual_value)
                } else {
                    Err(CoreError::DriverAssertion { expected: expected.describe(), actual: actual_value })
                }
            }
        }
    }

    async fn heal(
        &self,
        step: &Step,
        failing_target: &str,
    ) -> Result<crate::resolver::ResolveOutcome, Option<CoreError>> {
        let url = self.driver.current_url().await.unwrap_or_default();
        let snapshot = self
            .driver
            .snapshot_interactive_elements(crate::driver::DEFAULT_MAX_INTERACTIVE_ELEMENTS)
            .await
            .unwrap_or_default();

        self.resolver
            .resolve(ResolveInput {
                original_target: failing_target,
                description: &step.description,
                kind: step.kind,
                data: step.data.as_deref(),
                url: &url,
                snapshot,
            })
            .await
    }

    async fn capture_window(&self) -> StepCapture {
        let mut capture = StepCapture::default();
        for event in self.driver.drain_events().await {
            match event {
                DriverEvent::Network { method, url, status, timestamp } => {
                    capture.network.push(NetworkEntry { method, url, status, timestamp });
                }
                DriverEvent::Console { level, message, source, timestamp } => {
                    capture.console.push(ConsoleEntry { level, message, source, timestamp });
                }
                DriverEvent::PageError { message, .. } => {
                    capture.page_errors.push(message);
                }
            }
        }
        capture
    }

    /// Screenshots only on failure (§4.5). Best-effort: a write failure is
    /// logged and the step result simply carries no `screenshot_ref`.
    async fn capture_failure_screenshot(&self, ordinal: u32, options: &ExecuteOptions) -> Option<String> {
        let dir = options.artifacts_dir.as_ref()?;
        let bytes = match self.driver.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "screenshot capture failed");
                return None;
            }
        };
        let filename = format!("step_{}_failure_{}.png", ordinal, Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        if let Err(e) = tokio::fs::write(dir.join(&filename), &bytes).await {
            tracing::warn!(error = %e, "writing failure screenshot failed");
            return None;
        }
        Some(filename)
    }

    async fn persist_execution_record(&self, plan: &Plan, run: &Run, url: Option<String>) {
        let errors: Vec<String> = run.step_results.iter().filter_map(|r| r.error_message.clone()).collect();

        let record = ExecutionRecord {
            plan_id: plan.id.clone(),
            plan_name: plan.name.clone(),
            url,
            step_descriptions: plan.steps.iter().map(|s| s.description.clone()).collect(),
            passed: run.passed_count(),
            failed: run.failed_count(),
            total: run.step_results.len() as u32,
            duration_ms: run
                .ended_at
                .map(|end| (end - run.started_at).num_milliseconds().max(0) as u64)
                .unwrap_or(0),
            timestamp: run.started_at,
            errors,
            browser: "chromium".to_string(),
            test_type: "e2e".to_string(),
        };

        let document = render_execution_text(&record);
        let embedding = match self.embedder.embed(&document).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "embedding execution record failed, skipping write-back");
                return;
            }
        };

        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), Scalar::Str("execution_record".to_string()));
        metadata.insert("planId".to_string(), Scalar::Str(record.plan_id.clone()));
        metadata.insert("testType".to_string(), Scalar::Str(record.test_type.clone()));
        metadata.insert("browser".to_string(), Scalar::Str(record.browser.clone()));
        metadata.insert("success".to_string(), Scalar::Bool(record.failed == 0));
        metadata.insert("durationMs".to_string(), Scalar::Int(record.duration_ms as i64));
        metadata.insert("timestamp".to_string(), Scalar::Str(record.timestamp.to_rfc3339()));

        if let Err(e) = self.store.store(&run.run_id, &document, embedding, metadata).await {
            tracing::warn!(error = %e, "execution record persistence failed, run outcome unaffected");
        }
    }
}

/// The byte-exact text skeleton of §6.2. Existing retrieval hits key off this
/// shape — do not reformat it.
pub fn render_execution_text(record: &ExecutionRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Test: {}\n", record.plan_name));
    out.push_str(&format!("URL: {}\n", record.url.as_deref().unwrap_or("N/A")));
    out.push_str("Steps:\n");
    for (i, description) in record.step_descriptions.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, description));
    }
    out.push_str(&format!("Results: {} passed, {} failed\n", record.passed, record.failed));
    out.push_str(&format!("Duration: {}ms\n", record.duration_ms));
    if !record.errors.is_empty() {
        out.push_str("Errors:\n");
        for err in &record.errors {
            out.push_str(&format!("  - {err}\n"));
        }
    }
    out.push_str(&format!("Browser: {}\n", record.browser));
    out.push_str(&format!("Type: {}\n", record.test_type));
    out
}

fn skipped_result(step: &Step) -> StepResult {
    StepResult {
        ordinal: step.ordinal,
        status: StepStatus::Skipped,
        attempts: 0,
        duration_ms: 0,
        expected_text: step.expected.as_ref().map(Assertion::describe).unwrap_or_default(),
        actual_text: String::new(),
        correction: None,
        error_kind: None,
        error_message: None,
        screenshot_ref: None,
        capture: StepCapture::default(),
    }
}

/// Backstop for §5's end-to-end Run deadline: a step still in flight (or
/// never reached) when `execute`'s surrounding `tokio::time::timeout` fires.
fn cancelled_result(step: &Step) -> StepResult {
    let error = CoreError::Cancelled;
    StepResult {
        ordinal: step.ordinal,
        status: StepStatus::Failed,
        attempts: 0,
        duration_ms: 0,
        expected_text: step.expected.as_ref().map(Assertion::describe).unwrap_or_default(),
        actual_text: String::new(),
        correction: None,
        error_kind: Some(error.code().to_string()),
        error_message: Some(error.user_message()),
        screenshot_ref: None,
        capture: StepCapture::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockBrowserDriver, MockElement};
    use crate::llm::{MockEmbeddingClient, MockLlmClient};
    use crate::protocol::{Assertion, PlanOptions, StepKind};
    use crate::store::InMemoryKnowledgeStore;
    use std::collections::HashSet;

    fn make_executor(driver: Arc<MockBrowserDriver>, llm: Arc<MockLlmClient>) -> PlanExecutor {
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new(16));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));
        let resolver = Arc::new(SelectorResolver::new(store.clone(), llm.clone(), embedder.clone()));
        let analyser = Arc::new(FailureAnalyser::new(store.clone(), llm, embedder.clone()));
        PlanExecutor::new(driver, resolver, analyser, store, embedder, CoreLimits::default())
    }

    fn run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn default_options() -> ExecuteOptions {
        ExecuteOptions {
            headless: true,
            continue_on_failure: false,
            auto_heal: true,
            default_step_timeout_ms: 10_000,
            max_step_retries: 2,
            artifacts_dir: None,
        }
    }

    #[tokio::test]
    async fn happy_path_two_steps_no_corrections() {
        let driver = Arc::new(MockBrowserDriver::new());
        driver.seed_element("css:h1", MockElement::new("Example Domain")).await;

        let llm = Arc::new(MockLlmClient::default());
        let executor = make_executor(driver, llm);

        let plan = Plan {
            id: "plan-1".into(),
            name: "happy path".into(),
            description: None,
            tags: HashSet::new(),
            steps: vec![
                Step { ordinal: 1, kind: StepKind::Navigate, target: "https://example.com".into(), data: None, expected: None, description: "go to example".into() },
                Step { ordinal: 2, kind: StepKind::Assert, target: "css:h1".into(), data: None, expected: Some(Assertion::Visible), description: "Verify heading".into() },
            ],
            options: PlanOptions::default(),
        };

        let run = executor.execute(run_id(), &plan, default_options(), None).await;

        assert_eq!(run.outcome, Some(RunOutcome::Passed));
        assert_eq!(run.step_results.len(), 2);
        assert!(run.step_results.iter().all(|r| r.status == StepStatus::Passed));
        assert!(run.step_results.iter().all(|r| r.screenshot_ref.is_none()));
        assert!(run.failure_analysis.is_none());
    }

    #[tokio::test]
    async fn selector_correction_via_llm_heals_step() {
        let driver = Arc::new(MockBrowserDriver::new());
        driver.fail_locator("css:#missing").await;
        driver.seed_element("text=Learn more", MockElement::new("Learn more")).await;

        let llm = Arc::new(MockLlmClient::default().with_correction("text=Learn more", 0.9));
        let executor = make_executor(driver, llm.clone());

        let plan = Plan {
            id: "plan-2".into(),
            name: "heal".into(),
            description: None,
            tags: HashSet::new(),
            steps: vec![
                Step { ordinal: 1, kind: StepKind::Navigate, target: "https://example.com".into(), data: None, expected: None, description: "go".into() },
                Step { ordinal: 2, kind: StepKind::Click, target: "css:#missing".into(), data: None, expected: None, description: "Click the more info link".into() },
            ],
            options: PlanOptions::default(),
        };

        let run = executor.execute(run_id(), &plan, default_options(), None).await;

        assert_eq!(run.outcome, Some(RunOutcome::Passed));
        let step2 = &run.step_results[1];
        assert!(step2.correction.is_some());
        assert_eq!(step2.correction.as_ref().unwrap().source, crate::protocol::CorrectionSource::Llm);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn terminal_failure_captures_screenshot_and_skips_remaining() {
        let driver = Arc::new(MockBrowserDriver::new());
        driver.fail_locator("css:#nonexistent").await;

        let llm = Arc::new(MockLlmClient::default().with_failing_correction());
        let executor = make_executor(driver.clone(), llm);

        let plan = Plan {
            id: "plan-3".into(),
            name: "terminal failure".into(),
            description: None,
            tags: HashSet::new(),
            steps: vec![
                Step { ordinal: 1, kind: StepKind::Navigate, target: "https://example.com".into(), data: None, expected: None, description: "go".into() },
                Step { ordinal: 2, kind: StepKind::Click, target: "css:#nonexistent".into(), data: None, expected: None, description: "Click submit".into() },
                Step { ordinal: 3, kind: StepKind::Assert, target: "css:h1".into(), data: None, expected: Some(Assertion::Visible), description: "never reached".into() },
            ],
            options: PlanOptions { max_step_retries: Some(1), ..PlanOptions::default() },
        };

        let dir = tempfile::tempdir().unwrap();
        let mut options = default_options();
        options.artifacts_dir = Some(dir.path().to_path_buf());

        let run = executor.execute(run_id(), &plan, options, None).await;

        assert_eq!(run.outcome, Some(RunOutcome::Failed));
        assert_eq!(run.step_results[1].status, StepStatus::Failed);
        assert_eq!(run.step_results[1].error_kind.as_deref(), Some("locator_unresolvable"));
        assert!(run.step_results[1].screenshot_ref.is_some());
        assert_eq!(run.step_results[2].status, StepStatus::Skipped);
        assert!(run.failure_analysis.is_some());
        assert_eq!(driver.screenshot_call_count(), 1);
    }

    #[tokio::test]
    async fn run_timeout_cancels_a_step_stuck_in_retry_backoff() {
        let driver = Arc::new(MockBrowserDriver::new());
        driver.seed_element("css:#spinner", MockElement::new("loading").hidden());

        let llm = Arc::new(MockLlmClient::default());
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new(16));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));
        let resolver = Arc::new(SelectorResolver::new(store.clone(), llm.clone(), embedder.clone()));
        let analyser = Arc::new(FailureAnalyser::new(store.clone(), llm, embedder.clone()));
        let mut limits = CoreLimits::default();
        limits.run_timeout = std::time::Duration::from_millis(10);
        let executor = PlanExecutor::new(driver, resolver, analyser, store, embedder, limits);

        let plan = Plan {
            id: "plan-timeout".into(),
            name: "stuck wait".into(),
            description: None,
            tags: HashSet::new(),
            steps: vec![Step {
                ordinal: 1,
                kind: StepKind::Wait,
                target: "css:#spinner".into(),
                data: None,
                expected: None,
                description: "wait for spinner to appear".into(),
            }],
            options: PlanOptions::default(),
        };

        let run = executor.execute(run_id(), &plan, default_options(), None).await;

        assert_eq!(run.outcome, Some(RunOutcome::Failed));
        assert_eq!(run.step_results.len(), 1);
        assert_eq!(run.step_results[0].error_kind.as_deref(), Some("cancelled"));
    }

    #[test]
    fn execution_text_matches_skeleton() {
        let record = ExecutionRecord {
            plan_id: "p1".into(),
            plan_name: "Example test".into(),
            url: Some("https://example.com".into()),
            step_descriptions: vec!["Go to page".into()],
            passed: 2,
            failed: 0,
            total: 2,
            duration_ms: 150,
            timestamp: Utc::now(),
            errors: vec![],
            browser: "chromium".into(),
            test_type: "e2e".into(),
        };
        let text = render_execution_text(&record);
        assert!(text.starts_with("Test: Example test\n"));
        assert!(text.contains("URL: https://example.com\n"));
        assert!(text.contains("Results: 2 passed, 0 failed\n"));
        assert!(text.contains("Browser: chromium\n"));
        assert!(text.contains("Type: e2e\n"));
    }
}
