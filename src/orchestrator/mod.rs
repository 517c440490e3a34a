//! Suite Orchestrator (C6) — flattens a suite (and its descendants in the
//! `parentId` forest) into its Plans and drives them through the Plan
//! Executor, either sequentially or with bounded parallelism.
//!
//! The bounded-parallel path is the same Semaphore + JoinSet shape the
//! teacher's DAG planner uses for concurrent step execution, applied here to
//! concurrent Plan runs instead of dependency-ordered steps — this
//! orchestrator has no step-level dependency graph to respect, only a
//! concurrency cap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::executor::{ExecuteOptions, ExecutionEvent, EventSink, PlanExecutor};
use crate::protocol::{Plan, Run, RunOutcome, Suite};
use crate::status::LiveStatusTracker;
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct SuiteExecutionOptions {
    pub parallel: bool,
    pub max_concurrent: usize,
    pub plan_options: ExecuteOptions,
}

pub struct SuiteOrchestrator {
    executor: Arc<PlanExecutor>,
    status: Arc<LiveStatusTracker>,
    storage: Arc<Storage>,
}

impl SuiteOrchestrator {
    pub fn new(executor: Arc<PlanExecutor>, status: Arc<LiveStatusTracker>, storage: Arc<Storage>) -> Self {
        Self { executor, status, storage }
    }

    /// Depth-first preorder list of every Plan id owned directly or
    /// transitively (through child suites) by `suite_id`.
    pub fn flatten_plan_ids(suite_id: &str, suites: &[Suite]) -> Vec<String> {
        let mut children: HashMap<&str, Vec<&Suite>> = HashMap::new();
        for suite in suites {
            if let Some(parent) = suite.parent_id.as_deref() {
                children.entry(parent).or_default().push(suite);
            }
        }
        let by_id: HashMap<&str, &Suite> = suites.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut out = Vec::new();
        let Some(root) = by_id.get(suite_id) else { return out };
        let mut stack = vec![*root];
        while let Some(suite) = stack.pop() {
            out.extend(suite.plan_ids.iter().cloned());
            if let Some(kids) = children.get(suite.id.as_str()) {
                stack.extend(kids.iter().copied());
            }
        }
        out
    }

    /// Runs every Plan owned by `suite_id` (transitively) and returns one
    /// [`Run`] per Plan id, in the flattened order for sequential execution,
    /// or completion order for parallel execution.
    pub async fn run_suite(
        &self,
        suite_id: &str,
        suites: &[Suite],
        plans: &HashMap<String, Plan>,
        options: SuiteExecutionOptions,
    ) -> Vec<Run> {
        let plan_ids = Self::flatten_plan_ids(suite_id, suites);
        self.status.suite_start(suite_id, &plan_ids).await;

        let runs = if !options.parallel {
            let mut runs = Vec::with_capacity(plan_ids.len());
            for plan_id in &plan_ids {
                runs.push(self.run_one(suite_id, plan_id, plans, &options.plan_options).await);
            }
            runs
        } else {
            let cap = options.max_concurrent.max(1);
            let semaphore = Arc::new(Semaphore::new(cap));
            let mut join_set = JoinSet::new();

            for plan_id in plan_ids {
                let Some(plan) = plans.get(&plan_id).cloned() else { continue };
                let executor = Arc::clone(&self.executor);
                let status = Arc::clone(&self.status);
                let storage = Arc::clone(&self.storage);
                let semaphore = Arc::clone(&semaphore);
                let plan_options = options.plan_options.clone();
                let suite_id = suite_id.to_string();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    run_plan(&executor, &status, &storage, &suite_id, &plan, plan_options).await
                });
            }

            let mut runs = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(run) => runs.push(run),
                    Err(join_error) => {
                        tracing::error!(error = %join_error, "plan execution task panicked");
                        runs.push(errored_run(join_error.to_string()));
                    }
                }
            }
            runs
        };

        self.status.suite_end(suite_id).await;
        runs
    }

    async fn run_one(&self, suite_id: &str, plan_id: &str, plans: &HashMap<String, Plan>, options: &ExecuteOptions) -> Run {
        match plans.get(plan_id) {
            Some(plan) => run_plan(&self.executor, &self.status, &self.storage, suite_id, plan, options.clone()).await,
            None => errored_run(format!("plan '{plan_id}' not found")),
        }
    }
}

/// Shared by the sequential and bounded-parallel paths: prepares the Run's
/// artifacts directory, wires a [`LiveStatusTracker`]-forwarding event sink,
/// and brackets the execution with `test_start`/`test_end` so per-test
/// progress moves while the suite is running instead of staying frozen at
/// `queued` until the whole suite completes.
async fn run_plan(
    executor: &Arc<PlanExecutor>,
    status: &Arc<LiveStatusTracker>,
    storage: &Arc<Storage>,
    suite_id: &str,
    plan: &Plan,
    mut options: ExecuteOptions,
) -> Run {
    let run_id = uuid::Uuid::new_v4().to_string();

    match storage.ensure_run_dir(&run_id).await {
        Ok(dir) => options.artifacts_dir = Some(dir),
        Err(e) => tracing::warn!(error = %e, run_id = %run_id, "failed to prepare run artifacts directory"),
    }

    status.test_start(suite_id, &plan.id, plan.steps.len() as u32).await;
    let sink = make_sink(Arc::clone(status), suite_id.to_string(), plan.id.clone());

    let started_at = Utc::now();
    let run = executor.execute(run_id, plan, options, Some(sink)).await;
    let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

    status
        .test_end(suite_id, &plan.id, run.outcome.unwrap_or(RunOutcome::Error), duration_ms)
        .await;

    run
}

/// Forwards step-level progress into the Live-Status Tracker. Only
/// `StepStart` drives `test_step`; pass/fail/correction/run-end are already
/// captured on the [`Run`] itself and don't need a separate live projection.
fn make_sink(status: Arc<LiveStatusTracker>, suite_id: String, plan_id: String) -> EventSink {
    Arc::new(move |event: ExecutionEvent| {
        let status = Arc::clone(&status);
        let suite_id = suite_id.clone();
        let plan_id = plan_id.clone();
        Box::pin(async move {
            if let ExecutionEvent::StepStart { ordinal } = event {
                status.test_step(&suite_id, &plan_id, ordinal).await;
            }
        })
    })
}

fn errored_run(message: String) -> Run {
    let mut run = Run::new("unknown");
    run.outcome = Some(RunOutcome::Error);
    run.ended_at = Some(run.started_at);
    run.failure_analysis = Some(crate::protocol::FailureAnalysis {
        understood: false,
        intent: "plan execution".to_string(),
        possible_causes: vec![message.clone()],
        suggested_fixes: Vec::new(),
        confidence: 0.0,
        raw_model_log: vec![format!("run aborted: {message}")],
    });
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn suite(id: &str, parent: Option<&str>, plan_ids: Vec<&str>) -> Suite {
        Suite {
            id: id.into(),
            name: id.into(),
            parent_id: parent.map(|p| p.to_string()),
            description: None,
            tags: HashSet::new(),
            plan_ids: plan_ids.into_iter().map(|s| s.to_string()).collect(),
            schedule: None,
            stats: Default::default(),
        }
    }

    #[test]
    fn flattens_nested_suites_in_preorder() {
        let suites = vec![
            suite("root", None, vec!["p1"]),
            suite("child-a", Some("root"), vec!["p2"]),
            suite("child-b", Some("root"), vec!["p3"]),
            suite("grandchild", Some("child-a"), vec!["p4"]),
        ];

        let plan_ids = SuiteOrchestrator::flatten_plan_ids("root", &suites);
        assert_eq!(plan_ids.len(), 4);
        assert!(plan_ids.contains(&"p1".to_string()));
        assert!(plan_ids.contains(&"p4".to_string()));
    }

    #[test]
    fn unknown_suite_flattens_to_empty() {
        let suites = vec![suite("root", None, vec!["p1"])];
        assert!(SuiteOrchestrator::flatten_plan_ids("missing", &suites).is_empty());
    }

    #[tokio::test]
    async fn run_suite_updates_live_status_and_persists_a_failure_screenshot() {
        use std::time::Duration;

        use crate::analyser::FailureAnalyser;
        use crate::driver::mock::{MockBrowserDriver, MockElement};
        use crate::llm::{EmbeddingClient, MockEmbeddingClient, MockLlmClient};
        use crate::protocol::{PlanOptions, Step, StepKind, TestRunStatus};
        use crate::resolver::SelectorResolver;
        use crate::store::{InMemoryKnowledgeStore, KnowledgeStore};

        let driver = Arc::new(MockBrowserDriver::new());
        driver.fail_locator("css:#nonexistent").await;
        driver.seed_element("css:h1", MockElement::new("Example Domain")).await;

        let llm = Arc::new(MockLlmClient::default().with_failing_correction());
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new(16));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(16));
        let resolver = Arc::new(SelectorResolver::new(store.clone(), llm.clone(), embedder.clone()));
        let analyser = Arc::new(FailureAnalyser::new(store.clone(), llm, embedder.clone()));
        let executor = Arc::new(PlanExecutor::new(driver, resolver, analyser, store, embedder, Default::default()));
        let status = Arc::new(LiveStatusTracker::new(Duration::from_secs(60)));
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let orchestrator = SuiteOrchestrator::new(executor, status.clone(), storage);

        let plan = Plan {
            id: "plan-1".into(),
            name: "failing plan".into(),
            description: None,
            tags: HashSet::new(),
            steps: vec![
                Step { ordinal: 1, kind: StepKind::Navigate, target: "https://example.com".into(), data: None, expected: None, description: "go".into() },
                Step { ordinal: 2, kind: StepKind::Click, target: "css:#nonexistent".into(), data: None, expected: None, description: "click missing".into() },
            ],
            options: PlanOptions { max_step_retries: Some(0), ..PlanOptions::default() },
        };
        let suites = vec![suite("root", None, vec!["plan-1"])];
        let mut plans = HashMap::new();
        plans.insert("plan-1".to_string(), plan);

        let options = SuiteExecutionOptions { parallel: false, max_concurrent: 1, plan_options: ExecuteOptions::default() };
        let runs = orchestrator.run_suite("root", &suites, &plans, options).await;

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, Some(RunOutcome::Failed));
        assert!(runs[0].step_results[1].screenshot_ref.is_some());

        let run_dir = dir.path().join("runs").join(&runs[0].run_id);
        let screenshot = run_dir.join(runs[0].step_results[1].screenshot_ref.as_ref().unwrap());
        assert!(screenshot.exists());

        let snapshot = status.snapshot("root").await.unwrap();
        assert_eq!(snapshot.tests[0].status, TestRunStatus::Failed);
        assert_eq!(snapshot.counts.failed, 1);
    }
}
