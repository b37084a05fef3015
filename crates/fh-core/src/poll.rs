//! Bounded polling
//!
//! One primitive for every "check, sleep, check again" loop: a fixed
//! interval, a hard attempt cap, no unbounded waits.

use std::future::Future;
use std::time::Duration;

/// Interval and attempt cap of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Sleep before the first check instead of checking immediately
    pub delay_first: bool,
}

impl PollPolicy {
    /// Check immediately, then once per `interval`
    pub fn immediate(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            delay_first: false,
        }
    }

    /// Sleep `interval` before every check, including the first
    pub fn delayed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            delay_first: true,
        }
    }
}

/// Run `check` until it yields a value or the attempts run out.
///
/// `check` receives the 1-based attempt number. Returns `None` when every
/// attempt came back empty.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if policy.delay_first || attempt > 1 {
            tokio::time::sleep(policy.interval).await;
        }

        if let Some(value) = check(attempt).await {
            return Some(value);
        }
    }

    None
}
