//! Browser Driver Adapter (C1) — the neutral interface the rest of the core
//! drives a headless browser through. `fantoccini::FantocciniDriver` is the
//! concrete WebDriver-backed implementation; `mock::MockBrowserDriver` is the
//! deterministic test double every other component's tests are written
//! against.

pub mod fantoccini_driver;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::protocol::Assertion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    Visible,
    Hidden,
    Attached,
}

/// One interactive element from `snapshotInteractiveElements`. Visible
/// elements only; bounded to `maxElements` (default 50) by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomElement {
    pub role: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A network, console, or page-error event emitted by the page during a
/// plan run. The Plan Executor slices these by wallclock window to attach
/// them to individual steps (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DriverEvent {
    Network {
        method: String,
        url: String,
        status: Option<u16>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Console {
        level: String,
        message: String,
        source: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    PageError {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Result of `assert`: whether the check held, plus the observed value
/// rendered into `StepResult.actualText`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub actual_value: String,
}

/// Single-tabbed adapter over a headless browser. A fresh context is created
/// per Plan run (§4.1) — implementations must not share browser state across
/// `navigate` calls belonging to different Plans.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str, wait_until: WaitUntil) -> Result<(), CoreError>;
    async fn click(&self, locator: &str) -> Result<(), CoreError>;
    async fn hover(&self, locator: &str) -> Result<(), CoreError>;
    async fn type_text(&self, locator: &str, text: &str, clear_first: bool) -> Result<(), CoreError>;
    async fn select(&self, locator: &str, value: &str) -> Result<(), CoreError>;
    async fn press(&self, key: &str) -> Result<(), CoreError>;
    async fn wait(&self, locator: &str, state: WaitState, timeout_ms: u64) -> Result<(), CoreError>;
    async fn assert(&self, assertion: &Assertion, target: &str) -> Result<AssertionOutcome, CoreError>;
    async fn snapshot_interactive_elements(&self, max_elements: usize) -> Result<Vec<DomElement>, CoreError>;
    async fn screenshot(&self) -> Result<Vec<u8>, CoreError>;
    async fn current_url(&self) -> Result<String, CoreError>;
    async fn title(&self) -> Result<String, CoreError>;
    /// Drains events observed since the last call (network requests,
    /// console messages, page errors). Started on `navigate`, emptied by the
    /// executor after attributing them to a step.
    async fn drain_events(&self) -> Vec<DriverEvent>;
    /// Releases the browser context. Called on every exit path (success,
    /// failure, panic) by the owner of the driver, never skipped.
    async fn close(&self) -> Result<(), CoreError>;
}

pub const DEFAULT_MAX_INTERACTIVE_ELEMENTS: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_until_serializes_lowercase() {
        let json = serde_json::to_string(&WaitUntil::DomContentLoaded).unwrap();
        assert_eq!(json, "\"domcontentloaded\"");
    }
}
