//! Core data model: the sum types every component exchanges.
//!
//! Everything here is a plain, exhaustively-matched enum or struct — no
//! `serde_json::Value` escape hatches in the model itself. Unknown `kind`/
//! `type` tags are rejected by serde at deserialization time rather than
//! silently accepted, per the "reject unknown kinds at ingest" design note.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One action or assertion inside a [`Plan`].
///
/// Invariants (enforced by [`crate::validation::validate_step`]):
/// `kind` of `type`/`select` requires `data`; `kind=assert` requires
/// `expected`; `kind=navigate` requires `target` to be an absolute URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// 1-based, unique within the owning Plan.
    pub ordinal: u32,
    pub kind: StepKind,
    /// Locator string in the neutral grammar (`locator` module), or an
    /// absolute URL when `kind=navigate`.
    pub target: String,
    /// Payload for `type`/`select` steps (text to type, option value).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Required when `kind=assert`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Assertion>,
    /// Free text fed to the selector resolver and failure analyser as the
    /// human intent behind the step.
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Navigate,
    Click,
    Type,
    Hover,
    Select,
    Press,
    Wait,
    Assert,
}

/// An observable check on the page. For `AttributeEquals`, the element is
/// selected by `Step::target` encoded as `selector::attribute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Assertion {
    Visible,
    Hidden,
    TextEquals { value: String },
    TextContains { value: String },
    UrlEquals { value: String },
    UrlContains { value: String },
    CountEquals { value: usize },
    AttributeEquals { name: String, value: String },
}

impl Assertion {
    /// The expected-outcome string rendered into `StepResult.expectedText`.
    pub fn describe(&self) -> String {
        match self {
            Assertion::Visible => "element is visible".to_string(),
            Assertion::Hidden => "element is hidden".to_string(),
            Assertion::TextEquals { value } => format!("text equals '{value}'"),
            Assertion::TextContains { value } => format!("text contains '{value}'"),
            Assertion::UrlEquals { value } => format!("url equals '{value}'"),
            Assertion::UrlContains { value } => format!("url contains '{value}'"),
            Assertion::CountEquals { value } => format!("count equals {value}"),
            Assertion::AttributeEquals { name, value } => {
                format!("attribute '{name}' equals '{value}'")
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_heal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step_retries: Option<u32>,
}

/// Immutable ordered sequence of [`Step`]. Ordinals must form `1..N` without
/// gaps; validated at ingest by [`crate::validation::validate_plan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub options: PlanOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteStats {
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub last_passed: Option<u32>,
    #[serde(default)]
    pub last_failed: Option<u32>,
}

/// A named node in a tree of suites. The `parentId` graph must be a forest
/// (no cycles); a Plan id appears in at most one suite's direct list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suite {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: HashSet<String>,
    /// Direct tests, in declared order. Nested suites are linked via
    /// `parent_id` on the child, not listed here.
    #[serde(default)]
    pub plan_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub stats: SuiteStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// A single network request/response pair observed during a step's wallclock
/// window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkEntry {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleEntry {
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepCapture {
    #[serde(default)]
    pub network: Vec<NetworkEntry>,
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
    #[serde(default)]
    pub page_errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionSource {
    Cache,
    Deterministic,
    Llm,
}

/// A replacement locator derived when the original failed. `attempts` is
/// fixed at 2 by construction: the failing attempt plus the corrected retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorCorrection {
    pub original_target: String,
    pub corrected_target: String,
    pub source: CorrectionSource,
    pub confidence: f64,
    pub attempts: u32,
}

impl SelectorCorrection {
    pub fn new(
        original_target: impl Into<String>,
        corrected_target: impl Into<String>,
        source: CorrectionSource,
        confidence: f64,
    ) -> Self {
        Self {
            original_target: original_target.into(),
            corrected_target: corrected_target.into(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
            attempts: 2,
        }
    }
}

/// Result of executing one [`Step`] within a [`Run`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub ordinal: u32,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub expected_text: String,
    pub actual_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<SelectorCorrection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Present only when `status == Failed`, per the capture-on-failure-only
    /// policy (§4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    #[serde(default)]
    pub capture: StepCapture,
}

/// Structured diagnosis of a step that failed terminally (after retries and,
/// if applicable, an unsuccessful auto-heal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureAnalysis {
    pub understood: bool,
    pub intent: String,
    pub possible_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub confidence: f64,
    /// Progress lines streamed to the UI; at least 6 per §4.4.
    pub raw_model_log: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunArtifacts {
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssertionsSummary {
    pub passed: u32,
    pub failed: u32,
}

/// A concrete execution of a [`Plan`]. Append-only and owned by the Plan
/// Executor until `ended_at` is set; read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub artifacts: RunArtifacts,
    #[serde(default)]
    pub assertions_summary: AssertionsSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<FailureAnalysis>,
}

impl Run {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            step_results: Vec::new(),
            artifacts: RunArtifacts::default(),
            assertions_summary: AssertionsSummary::default(),
            failure_analysis: None,
        }
    }

    /// Same as [`Run::new`] but with a caller-supplied id, so the Run and an
    /// artifacts directory prepared ahead of time agree on the same path.
    pub fn with_id(run_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into(), ..Self::new(plan_id) }
    }

    pub fn passed_count(&self) -> u32 {
        self.step_results
            .iter()
            .filter(|r| r.status == StepStatus::Passed)
            .count() as u32
    }

    pub fn failed_count(&self) -> u32 {
        self.step_results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .count() as u32
    }

    pub fn skipped_count(&self) -> u32 {
        self.step_results
            .iter()
            .filter(|r| r.status == StepStatus::Skipped)
            .count() as u32
    }
}

/// Compact projection of a [`Run`] stored in the Knowledge Store for semantic
/// retrieval. See the `locator` / embedding-text module for the exact text
/// skeleton produced from this struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub plan_id: String,
    pub plan_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub step_descriptions: Vec<String>,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default = "default_test_type")]
    pub test_type: String,
}

fn default_browser() -> String {
    "chromium".to_string()
}

fn default_test_type() -> String {
    "e2e".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Push,
    Schedule,
    Webhook,
    Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchConditions {
    #[serde(default)]
    pub branch_globs: Vec<String>,
    #[serde(default)]
    pub file_globs: Vec<String>,
    #[serde(default)]
    pub skip_globs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_expr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerExecutionOptions {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_on_failure: bool,
    #[serde(default)]
    pub max_retries: u32,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    300_000
}

impl Default for TriggerExecutionOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_concurrent: default_max_concurrent(),
            timeout_ms: default_timeout_ms(),
            retry_on_failure: false,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerStats {
    #[serde(default)]
    pub total_dispatches: u64,
    #[serde(default)]
    pub last_dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: String,
    pub enabled: bool,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub match_conditions: MatchConditions,
    pub target_suite_ids: Vec<String>,
    #[serde(default)]
    pub execution_options: TriggerExecutionOptions,
    #[serde(default)]
    pub stats: TriggerStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuiteRunStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestRunStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteProgress {
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
}

impl SuiteProgress {
    pub fn recompute(&mut self) {
        self.percentage = if self.total == 0 {
            0
        } else {
            (100 * self.completed / self.total).min(100)
        };
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteCounts {
    pub running: u32,
    pub queued: u32,
    pub passed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestLiveState {
    pub plan_id: String,
    pub status: TestRunStatus,
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Ephemeral per-suite state tracked by the Live-Status Tracker (C7). Never
/// persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveSuiteState {
    pub suite_id: String,
    pub status: SuiteRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: SuiteProgress,
    #[serde(default)]
    pub counts: SuiteCounts,
    #[serde(default)]
    pub tests: Vec<TestLiveState>,
}

impl LiveSuiteState {
    pub fn idle(suite_id: impl Into<String>) -> Self {
        Self {
            suite_id: suite_id.into(),
            status: SuiteRunStatus::Idle,
            started_at: None,
            ended_at: None,
            progress: SuiteProgress::default(),
            counts: SuiteCounts::default(),
            tests: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_tag_round_trips() {
        let a = Assertion::TextContains { value: "hello".into() };
        let json = serde_json::to_string(&a).unwrap();
        let back: Assertion = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn unknown_assertion_tag_is_rejected() {
        let json = r#"{"type":"bogus"}"#;
        let parsed: Result<Assertion, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let json = r#"{"ordinal":1,"kind":"teleport","target":"x","description":""}"#;
        let parsed: Result<Step, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn run_counts_outcome() {
        let mut run = Run::new("plan-1");
        run.step_results.push(StepResult {
            ordinal: 1,
            status: StepStatus::Passed,
            attempts: 1,
            duration_ms: 5,
            expected_text: "".into(),
            actual_text: "".into(),
            correction: None,
            error_kind: None,
            error_message: None,
            screenshot_ref: None,
            capture: StepCapture::default(),
        });
        assert_eq!(run.passed_count(), 1);
        assert_eq!(run.failed_count(), 0);
    }

    #[test]
    fn suite_progress_percentage_floors() {
        let mut progress = SuiteProgress { completed: 1, total: 3, percentage: 0 };
        progress.recompute();
        assert_eq!(progress.percentage, 33);
    }
}
