//! Resource caps for the orchestrator and dispatcher.
//!
//! Guards against runaway suites and trigger floods rather than against any
//! single untrusted plan: `maxConcurrentPlans` bounds C6's worker pool,
//! `triggerQueueHighWaterMark` bounds C9's backlog, `maxStepRetries` bounds
//! C5's flake-retry loop, `runTimeout` bounds a single Run end to end, and
//! `liveStatusTtl` bounds how long C7 keeps a finished suite's state around.

use std::time::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENT_PLANS: usize = 3;
pub const DEFAULT_TRIGGER_QUEUE_HIGH_WATER_MARK: usize = 100;
pub const DEFAULT_MAX_STEP_RETRIES: u32 = 2;
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LIVE_STATUS_TTL_SECS: u64 = 300;

/// Driver/LLM default per-operation timeouts (§5), not user-configurable per
/// spec but named here so every module reads the same constants.
pub const DEFAULT_DRIVER_OP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LLM_CORRECTION_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_LLM_ANALYSIS_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreLimits {
    /// Hard cap on in-flight Plan Executors across all suites (C6 §4.6).
    pub max_concurrent_plans: usize,
    /// C9 rejects new triggers with `queue_full` once the backlog exceeds this.
    pub trigger_queue_high_water_mark: usize,
    /// `maxStepRetries` default when a Plan's options omit it.
    pub max_step_retries: u32,
    /// End-to-end Run deadline (§5).
    pub run_timeout: Duration,
    /// How long C7 keeps a completed suite's Live Suite State before erasing it.
    pub live_status_ttl: Duration,
}

impl Default for CoreLimits {
    fn default() -> Self {
        Self {
            max_concurrent_plans: DEFAULT_MAX_CONCURRENT_PLANS,
            trigger_queue_high_water_mark: DEFAULT_TRIGGER_QUEUE_HIGH_WATER_MARK,
            max_step_retries: DEFAULT_MAX_STEP_RETRIES,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            live_status_ttl: Duration::from_secs(DEFAULT_LIVE_STATUS_TTL_SECS),
        }
    }
}

impl CoreLimits {
    /// Reads `E2E_MAX_CONCURRENT_PLANS`, `E2E_TRIGGER_QUEUE_HWM`,
    /// `E2E_MAX_STEP_RETRIES`, `E2E_RUN_TIMEOUT_SECS`, `E2E_LIVE_STATUS_TTL_SECS`;
    /// unset or unparsable variables fall back to the default.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(val) = std::env::var("E2E_MAX_CONCURRENT_PLANS") {
            if let Ok(n) = val.parse() {
                limits.max_concurrent_plans = n;
            }
        }
        if let Ok(val) = std::env::var("E2E_TRIGGER_QUEUE_HWM") {
            if let Ok(n) = val.parse() {
                limits.trigger_queue_high_water_mark = n;
            }
        }
        if let Ok(val) = std::env::var("E2E_MAX_STEP_RETRIES") {
            if let Ok(n) = val.parse() {
                limits.max_step_retries = n;
            }
        }
        if let Ok(val) = std::env::var("E2E_RUN_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                limits.run_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("E2E_LIVE_STATUS_TTL_SECS") {
            if let Ok(n) = val.parse() {
                limits.live_status_ttl = Duration::from_secs(n);
            }
        }

        limits
    }

    pub fn strict() -> Self {
        Self {
            max_concurrent_plans: 1,
            trigger_queue_high_water_mark: 5,
            max_step_retries: 1,
            run_timeout: Duration::from_secs(30),
            live_status_ttl: Duration::from_secs(10),
        }
    }
}
