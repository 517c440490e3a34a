//! Live-Status Tracker (C7) — ephemeral, in-memory per-suite progress state.
//! Never persisted to disk; erased a fixed TTL after `suiteEnd` (§4.7).
//!
//! Per-suite mutation is serialized (one entry per suite in the map, updated
//! under its own lock) while reads take a snapshot without blocking writers
//! to other suites — the same per-key-lock-not-global-lock shape the
//! Knowledge Store uses `dashmap` for.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::protocol::{LiveSuiteState, SuiteRunStatus, TestLiveState, TestRunStatus};

struct Tracked {
    state: Mutex<LiveSuiteState>,
    ended_at: Mutex<Option<Instant>>,
}

/// Tracks [`LiveSuiteState`] for every suite currently or recently running.
/// `ttl` controls how long a suite's state survives past `suiteEnd` before
/// [`LiveStatusTracker::sweep_expired`] erases it.
pub struct LiveStatusTracker {
    suites: DashMap<String, Arc<Tracked>>,
    ttl: Duration,
}

impl LiveStatusTracker {
    pub fn new(ttl: Duration) -> Self {
        Self { suites: DashMap::new(), ttl }
    }

    pub async fn suite_start(&self, suite_id: &str, plan_ids: &[String]) {
        let mut state = LiveSuiteState::idle(suite_id);
        state.status = SuiteRunStatus::Running;
        state.started_at = Some(chrono::Utc::now());
        state.progress.total = plan_ids.len() as u32;
        state.counts.queued = plan_ids.len() as u32;
        state.tests = plan_ids
            .iter()
            .map(|id| TestLiveState {
                plan_id: id.clone(),
                status: TestRunStatus::Queued,
                current_step: 0,
                total_steps: 0,
                started_at: None,
                duration_ms: None,
            })
            .collect();

        self.suites.insert(
            suite_id.to_string(),
            Arc::new(Tracked { state: Mutex::new(state), ended_at: Mutex::new(None) }),
        );
    }

    pub async fn test_start(&self, suite_id: &str, plan_id: &str, total_steps: u32) {
        self.mutate(suite_id, |state| {
            if let Some(test) = state.tests.iter_mut().find(|t| t.plan_id == plan_id) {
                if test.status == TestRunStatus::Queued {
                    state.counts.queued = state.counts.queued.saturating_sub(1);
                }
                test.status = TestRunStatus::Running;
                test.total_steps = total_steps;
                test.started_at = Some(chrono::Utc::now());
            }
            state.counts.running += 1;
        })
        .await;
    }

    pub async fn test_step(&self, suite_id: &str, plan_id: &str, current_step: u32) {
        self.mutate(suite_id, |state| {
            if let Some(test) = state.tests.iter_mut().find(|t| t.plan_id == plan_id) {
                test.current_step = current_step;
            }
        })
        .await;
    }

    pub async fn test_end(&self, suite_id: &str, plan_id: &str, outcome: crate::protocol::RunOutcome, duration_ms: u64) {
        self.mutate(suite_id, |state| {
            if let Some(test) = state.tests.iter_mut().find(|t| t.plan_id == plan_id) {
                test.status = match outcome {
                    crate::protocol::RunOutcome::Passed => TestRunStatus::Passed,
                    crate::protocol::RunOutcome::Failed => TestRunStatus::Failed,
                    crate::protocol::RunOutcome::Error => TestRunStatus::Error,
                };
                test.duration_ms = Some(duration_ms);
            }
            state.counts.running = state.counts.running.saturating_sub(1);
            match outcome {
                crate::protocol::RunOutcome::Passed => state.counts.passed += 1,
                _ => state.counts.failed += 1,
            }
            state.progress.completed += 1;
            state.progress.recompute();
        })
        .await;
    }

    pub async fn suite_end(&self, suite_id: &str) {
        self.mutate(suite_id, |state| {
            state.status = SuiteRunStatus::Completed;
            state.ended_at = Some(chrono::Utc::now());
        })
        .await;

        if let Some(entry) = self.suites.get(suite_id) {
            *entry.ended_at.lock().await = Some(Instant::now());
        }
    }

    pub async fn snapshot(&self, suite_id: &str) -> Option<LiveSuiteState> {
        let entry = self.suites.get(suite_id)?.clone();
        Some(entry.state.lock().await.clone())
    }

    /// Removes any suite whose `suiteEnd` happened more than `ttl` ago.
    /// Intended to run on a periodic interval from the HTTP server's
    /// background task set.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.suites.retain(|_, tracked| {
            match tracked.ended_at.try_lock() {
                Ok(guard) => match *guard {
                    Some(ended_at) => ended_at.elapsed() < ttl,
                    None => true,
                },
                Err(_) => true,
            }
        });
    }

    async fn mutate(&self, suite_id: &str, f: impl FnOnce(&mut LiveSuiteState)) {
        if let Some(entry) = self.suites.get(suite_id) {
            let entry = entry.clone();
            let mut guard = entry.state.lock().await;
            f(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunOutcome;

    #[tokio::test]
    async fn suite_start_initializes_queued_tests() {
        let tracker = LiveStatusTracker::new(Duration::from_secs(300));
        tracker.suite_start("s1", &["p1".to_string(), "p2".to_string()]).await;

        let state = tracker.snapshot("s1").await.unwrap();
        assert_eq!(state.status, SuiteRunStatus::Running);
        assert_eq!(state.progress.total, 2);
        assert_eq!(state.counts.queued, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_updates_counts_and_progress() {
        let tracker = LiveStatusTracker::new(Duration::from_secs(300));
        tracker.suite_start("s1", &["p1".to_string()]).await;
        tracker.test_start("s1", "p1", 3).await;
        tracker.test_step("s1", "p1", 2).await;
        tracker.test_end("s1", "p1", RunOutcome::Passed, 500).await;

        let state = tracker.snapshot("s1").await.unwrap();
        assert_eq!(state.counts.passed, 1);
        assert_eq!(state.counts.running, 0);
        assert_eq!(state.progress.completed, 1);
        assert_eq!(state.progress.percentage, 100);
        assert_eq!(state.tests[0].status, TestRunStatus::Passed);
    }

    #[tokio::test]
    async fn unknown_suite_snapshot_is_none() {
        let tracker = LiveStatusTracker::new(Duration::from_secs(300));
        assert!(tracker.snapshot("missing").await.is_none());
    }

    #[tokio::test]
    async fn suite_end_marks_completed() {
        let tracker = LiveStatusTracker::new(Duration::from_secs(300));
        tracker.suite_start("s1", &["p1".to_string()]).await;
        tracker.suite_end("s1").await;
        let state = tracker.snapshot("s1").await.unwrap();
        assert_eq!(state.status, SuiteRunStatus::Completed);
        assert!(state.ended_at.is_some());
    }
}
