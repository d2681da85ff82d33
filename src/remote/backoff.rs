//! Poll-delay policy for remote sessions.

use std::time::Duration;

/// Smallest base delay; a zero base could never grow.
const MIN_BASE: Duration = Duration::from_millis(1);

/// Multiplicative backoff between polls.
///
/// Successful polls run at the base interval. Each transient failure grows
/// the delay by `multiplier`, capped at `max`. A server `Retry-After` can
/// raise the next delay but never lowers it.
#[derive(Clone, Copy, Debug)]
pub struct PollBackoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        let base = base.max(MIN_BASE);
        let max = max.max(base);
        Self {
            base,
            multiplier: multiplier.max(1.0),
            max,
            current: base,
        }
    }

    /// Delay before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return to the base interval after a successful poll.
    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }

    /// Grow the delay after a transient failure and return it.
    pub fn on_failure(&mut self, retry_after: Option<Duration>) -> Duration {
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        let floor = retry_after.unwrap_or_default();
        self.current = grown.max(floor).min(self.max);
        self.current
    }
}
