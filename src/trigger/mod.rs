//! Trigger Dispatcher (C9) — matches incoming VCS/schedule/manual events
//! against registered [`Trigger`]s and enqueues suite runs, with dedupe and
//! a bounded queue (§4.9).

use std::collections::HashSet;

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::mpsc;

use crate::protocol::{MatchConditions, Trigger, TriggerType};

#[derive(Debug, Clone)]
pub struct VcsEvent {
    pub branch: String,
    pub changed_files: Vec<String>,
    pub commit_message: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone)]
pub struct DispatchedRun {
    pub trigger_id: String,
    pub suite_id: String,
    pub dedupe_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    QueueFull,
}

/// Glob-to-regex translation good enough for the branch/file patterns this
/// dispatcher matches (`*` within a segment, `**` across segments).
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let mut regex_str = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex_str.push_str(".*");
                } else {
                    regex_str.push_str("[^/]*");
                }
            }
            '.' | '+' | '(' | ')' | '|' | '^' | '$' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            other => regex_str.push(other),
        }
    }
    regex_str.push('$');
    Regex::new(&regex_str).map(|re| re.is_match(candidate)).unwrap_or(false)
}

fn matches_conditions(conditions: &MatchConditions, event: &VcsEvent) -> bool {
    if !conditions.branch_globs.is_empty()
        && !conditions.branch_globs.iter().any(|g| glob_matches(g, &event.branch))
    {
        return false;
    }

    if let Some(pattern) = &conditions.commit_message_regex {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(&event.commit_message) => return false,
            Err(e) => {
                tracing::warn!(error = %e, pattern, "invalid commit message regex on trigger, skipping match");
                return false;
            }
            _ => {}
        }
    }

    if !conditions.skip_globs.is_empty()
        && event
            .changed_files
            .iter()
            .all(|f| conditions.skip_globs.iter().any(|g| glob_matches(g, f)))
    {
        return false;
    }

    if !conditions.file_globs.is_empty() {
        let any_file_matches = event
            .changed_files
            .iter()
            .any(|f| conditions.file_globs.iter().any(|g| glob_matches(g, f)));
        if !any_file_matches {
            return false;
        }
    }

    true
}

/// Holds registered triggers and a bounded dispatch queue. `queue_high_water_mark`
/// rejects new dispatches with [`DispatchError::QueueFull`] instead of
/// growing unbounded (§4.9).
pub struct TriggerDispatcher {
    triggers: DashMap<String, Trigger>,
    recent_dispatches: DashMap<String, ()>,
    sender: mpsc::Sender<DispatchedRun>,
    queue_high_water_mark: usize,
}

impl TriggerDispatcher {
    pub fn new(queue_high_water_mark: usize) -> (Self, mpsc::Receiver<DispatchedRun>) {
        let (sender, receiver) = mpsc::channel(queue_high_water_mark.max(1));
        (
            Self {
                triggers: DashMap::new(),
                recent_dispatches: DashMap::new(),
                sender,
                queue_high_water_mark,
            },
            receiver,
        )
    }

    pub fn upsert(&self, trigger: Trigger) {
        self.triggers.insert(trigger.id.clone(), trigger);
    }

    pub fn remove(&self, trigger_id: &str) {
        self.triggers.remove(trigger_id);
    }

    pub fn get(&self, trigger_id: &str) -> Option<Trigger> {
        self.triggers.get(trigger_id).map(|t| t.clone())
    }

    pub fn list(&self) -> Vec<Trigger> {
        self.triggers.iter().map(|t| t.value().clone()).collect()
    }

    /// Matches a VCS event against every enabled `vcsEvent`/`push` trigger
    /// and enqueues one dispatch per matching trigger/suite pair, deduped on
    /// `triggerId:commitSha`.
    pub async fn dispatch_vcs_event(&self, event: &VcsEvent) -> Result<Vec<DispatchedRun>, DispatchError> {
        if self.sender.capacity() == 0 {
            return Err(DispatchError::QueueFull);
        }

        let mut dispatched = Vec::new();
        for entry in self.triggers.iter() {
            let trigger = entry.value();
            if !trigger.enabled || !matches!(trigger.trigger_type, TriggerType::Push | TriggerType::Webhook) {
                continue;
            }
            if !matches_conditions(&trigger.match_conditions, event) {
                continue;
            }

            let dedupe_key = format!("{}:{}", trigger.id, event.commit_sha);
            if self.recent_dispatches.contains_key(&dedupe_key) {
                continue;
            }

            for suite_id in &trigger.target_suite_ids {
                let run = DispatchedRun { trigger_id: trigger.id.clone(), suite_id: suite_id.clone(), dedupe_key: dedupe_key.clone() };
                if self.sender.send(run.clone()).await.is_err() {
                    return Err(DispatchError::QueueFull);
                }
                dispatched.push(run);
            }
            self.recent_dispatches.insert(dedupe_key, ());
        }

        Ok(dispatched)
    }

    pub async fn dispatch_manual(&self, trigger_id: &str) -> Result<Vec<DispatchedRun>, DispatchError> {
        let Some(trigger) = self.get(trigger_id) else { return Ok(Vec::new()) };
        let mut dispatched = Vec::new();
        for suite_id in &trigger.target_suite_ids {
            let run = DispatchedRun {
                trigger_id: trigger.id.clone(),
                suite_id: suite_id.clone(),
                dedupe_key: format!("{}:manual", trigger.id),
            };
            if self.sender.send(run.clone()).await.is_err() {
                return Err(DispatchError::QueueFull);
            }
            dispatched.push(run);
        }
        Ok(dispatched)
    }

    pub fn queued_dedupe_keys(&self) -> HashSet<String> {
        self.recent_dispatches.iter().map(|e| e.key().clone()).collect()
    }

    pub fn queue_high_water_mark(&self) -> usize {
        self.queue_high_water_mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TriggerExecutionOptions, TriggerStats};

    fn push_trigger(id: &str, branch_glob: &str, suite_id: &str) -> Trigger {
        Trigger {
            id: id.to_string(),
            enabled: true,
            trigger_type: TriggerType::Push,
            match_conditions: MatchConditions {
                branch_globs: vec![branch_glob.to_string()],
                file_globs: vec![],
                skip_globs: vec![],
                commit_message_regex: None,
                schedule_expr: None,
            },
            target_suite_ids: vec![suite_id.to_string()],
            execution_options: TriggerExecutionOptions::default(),
            stats: TriggerStats::default(),
        }
    }

    fn event(branch: &str, sha: &str) -> VcsEvent {
        VcsEvent {
            branch: branch.to_string(),
            changed_files: vec!["src/main.rs".to_string()],
            commit_message: "fix bug".to_string(),
            commit_sha: sha.to_string(),
        }
    }

    #[tokio::test]
    async fn matching_branch_glob_dispatches_to_target_suite() {
        let (dispatcher, mut rx) = TriggerDispatcher::new(10);
        dispatcher.upsert(push_trigger("t1", "main", "suite-1"));

        let dispatched = dispatcher.dispatch_vcs_event(&event("main", "sha1")).await.unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].suite_id, "suite-1");
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn non_matching_branch_is_skipped() {
        let (dispatcher, _rx) = TriggerDispatcher::new(10);
        dispatcher.upsert(push_trigger("t1", "release/*", "suite-1"));

        let dispatched = dispatcher.dispatch_vcs_event(&event("main", "sha1")).await.unwrap();
        assert!(dispatched.is_empty());
    }

    #[tokio::test]
    async fn same_commit_sha_is_deduped() {
        let (dispatcher, mut rx) = TriggerDispatcher::new(10);
        dispatcher.upsert(push_trigger("t1", "main", "suite-1"));

        dispatcher.dispatch_vcs_event(&event("main", "sha1")).await.unwrap();
        let second = dispatcher.dispatch_vcs_event(&event("main", "sha1")).await.unwrap();
        assert!(second.is_empty());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn glob_matches_single_and_double_star() {
        assert!(glob_matches("src/*.rs", "src/main.rs"));
        assert!(!glob_matches("src/*.rs", "src/nested/main.rs"));
        assert!(glob_matches("src/**/*.rs", "src/nested/deep/main.rs"));
    }
}
