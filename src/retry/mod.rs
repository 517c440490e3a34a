//! Standalone retry/backoff policy. The Plan Executor inlines its own
//! retry math (its ordering guarantees — correction retries don't consume a
//! flake-retry attempt — are easiest to read straight-line), but the
//! backoff curve itself is factored out here as an independently testable
//! unit, the same way the teacher keeps a `RecoveryStrategy` abstraction
//! alongside an inlined production retry loop.

use std::time::Duration;

const BASE_MS: u64 = 500;
const CAP: Duration = Duration::from_secs(5);

/// `min(500ms * 2^attempt, 5s)` (§4.5). `attempt` is 0-based: the delay
/// before the *first* retry is `backoff(0)`.
pub fn backoff(attempt: u32) -> Duration {
    let millis = BASE_MS.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    Duration::from_millis(millis).min(CAP)
}
