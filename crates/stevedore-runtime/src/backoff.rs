//! Bounded exponential backoff.

use std::time::Duration;

use stevedore_common::config::BackoffPolicy;
use stevedore_common::error::RuntimeError;

/// Delay schedule for one retry loop.
///
/// Delays grow by `factor` up to `max_interval`; the schedule ends once the
/// delays handed out add up to `ceiling`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    spent: Duration,
}

impl Backoff {
    /// Starts a schedule for `policy`.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            next: policy.initial,
            policy,
            spent: Duration::ZERO,
        }
    }

    /// Total delay handed out so far.
    #[must_use]
    pub const fn spent(&self) -> Duration {
        self.spent
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let remaining = self.policy.ceiling.saturating_sub(self.spent);
        if remaining.is_zero() {
            return None;
        }
        let delay = self.next.min(self.policy.max_interval).min(remaining);
        self.spent += delay;
        self.next = self
            .next
            .saturating_mul(self.policy.factor.max(1))
            .max(Duration::from_millis(1));
        Some(delay)
    }
}

/// Runs `op`, retrying while it reports [`RuntimeError::DaemonUnavailable`].
///
/// Every other error is returned immediately.
///
/// # Errors
///
/// Returns the last error once the schedule is exhausted.
pub fn retry_transient<T>(
    policy: BackoffPolicy,
    what: &str,
    mut op: impl FnMut() -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let mut schedule = Backoff::new(policy);
    loop {
        match op() {
            Err(RuntimeError::DaemonUnavailable { message }) => match schedule.next() {
                Some(delay) => {
                    tracing::warn!(operation = what, ?delay, %message, "runtime unavailable, retrying");
                    std::thread::sleep(delay);
                }
                None => return Err(RuntimeError::DaemonUnavailable { message }),
            },
            other => return other,
        }
    }
}
