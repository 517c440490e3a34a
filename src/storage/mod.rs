//! Filesystem persistence (§6.3) — one JSON file per Suite, one per
//! Trigger, and a `report.json` inside each Run's artifact directory.
//! Screenshots are written by the Plan Executor directly into that same
//! directory; this module only owns the JSON records.
//!
//! Grounded on the teacher's loader, generalized from "read one UTDL file"
//! to "read/write one record of a named kind under a root directory".

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::protocol::{Run, Suite, Trigger};

/// Root of the persisted filesystem tree: `suites/`, `triggers/`, `runs/`.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn suites_dir(&self) -> PathBuf {
        self.root.join("suites")
    }

    fn triggers_dir(&self) -> PathBuf {
        self.root.join("triggers")
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }

    pub async fn save_suite(&self, suite: &Suite) -> Result<()> {
        write_json(&self.suites_dir(), &suite.id, suite).await
    }

    pub async fn load_suite(&self, suite_id: &str) -> Result<Suite> {
        read_json(&self.suites_dir(), suite_id).await
    }

    pub async fn list_suites(&self) -> Result<Vec<Suite>> {
        list_json(&self.suites_dir()).await
    }

    pub async fn delete_suite(&self, suite_id: &str) -> Result<()> {
        delete_json(&self.suites_dir(), suite_id).await
    }

    pub async fn save_trigger(&self, trigger: &Trigger) -> Result<()> {
        write_json(&self.triggers_dir(), &trigger.id, trigger).await
    }

    pub async fn load_trigger(&self, trigger_id: &str) -> Result<Trigger> {
        read_json(&self.triggers_dir(), trigger_id).await
    }

    pub async fn list_triggers(&self) -> Result<Vec<Trigger>> {
        list_json(&self.triggers_dir()).await
    }

    pub async fn delete_trigger(&self, trigger_id: &str) -> Result<()> {
        delete_json(&self.triggers_dir(), trigger_id).await
    }

    /// Artifact directory for `run_id`, creating it if absent. The Plan
    /// Executor writes failure screenshots here directly; this call exists
    /// so both it and [`Storage::save_run_report`] agree on the path.
    pub async fn ensure_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).await.with_context(|| format!("creating run directory for '{run_id}'"))?;
        Ok(dir)
    }

    pub async fn save_run_report(&self, run: &Run) -> Result<()> {
        let dir = self.ensure_run_dir(&run.run_id).await?;
        let path = dir.join("report.json");
        let body = serde_json::to_string_pretty(run).context("serializing run report")?;
        fs::write(&path, body).await.with_context(|| format!("writing {}", path.display()))
    }

    pub async fn load_run_report(&self, run_id: &str) -> Result<Run> {
        let path = self.run_dir(run_id).join("report.json");
        let body = fs::read_to_string(&path).await.with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))
    }
}

async fn write_json<T: Serialize>(dir: &Path, id: &str, value: &T) -> Result<()> {
    fs::create_dir_all(dir).await.with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{id}.json"));
    let body = serde_json::to_string_pretty(value).context("serializing record")?;
    fs::write(&path, body).await.with_context(|| format!("writing {}", path.display()))
}

async fn read_json<T: DeserializeOwned>(dir: &Path, id: &str) -> Result<T> {
    let path = dir.join(format!("{id}.json"));
    let body = fs::read_to_string(&path).await.with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))
}

async fn delete_json(dir: &Path, id: &str) -> Result<()> {
    let path = dir.join(format!("{id}.json"));
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("deleting {}", path.display())),
    }
}

async fn list_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(dir).await.with_context(|| format!("reading {}", dir.display()))?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let body = fs::read_to_string(&path).await.with_context(|| format!("reading {}", path.display()))?;
        out.push(serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Run;
    use std::collections::HashSet;

    fn suite(id: &str) -> Suite {
        Suite {
            id: id.to_string(),
            name: "checkout suite".to_string(),
            parent_id: None,
            description: None,
            tags: HashSet::new(),
            plan_ids: vec!["p1".to_string()],
            schedule: None,
            stats: Default::default(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_suite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_suite(&suite("s1")).await.unwrap();

        let loaded = storage.load_suite("s1").await.unwrap();
        assert_eq!(loaded.id, "s1");
        assert_eq!(loaded.plan_ids, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn list_suites_returns_all_saved() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_suite(&suite("s1")).await.unwrap();
        storage.save_suite(&suite("s2")).await.unwrap();

        let all = storage.list_suites().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_suite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save_suite(&suite("s1")).await.unwrap();
        storage.delete_suite("s1").await.unwrap();
        storage.delete_suite("s1").await.unwrap();
        assert!(storage.load_suite("s1").await.is_err());
    }

    #[tokio::test]
    async fn run_report_round_trips_under_its_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let run = Run::new("p1");
        storage.save_run_report(&run).await.unwrap();

        let loaded = storage.load_run_report(&run.run_id).await.unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert!(dir.path().join("runs").join(&run.run_id).join("report.json").exists());
    }
}
