//! Sliding-window throttling for outgoing API calls.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Allows at most `calls` invocations inside any trailing window of `period`.
///
/// Callers that would exceed the budget are put to sleep until the oldest call
/// in the window ages out. Calls are never dropped or reordered.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    history: VecDeque<Instant>,
}

impl RateLimiter {
    /// A `calls` of zero is treated as one call per period.
    pub fn new(calls: u32, period: Duration) -> Self {
        let calls = calls.max(1) as usize;
        Self {
            calls,
            period,
            history: VecDeque::with_capacity(calls),
        }
    }

    pub fn per_seconds(calls: u32, seconds: u64) -> Self {
        Self::new(calls, Duration::from_secs(seconds))
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until another call fits into the window, then record it.
    pub fn acquire(&mut self) {
        let now = Instant::now();
        while let Some(oldest) = self.history.front() {
            if now.duration_since(*oldest) >= self.period {
                self.history.pop_front();
            } else {
                break;
            }
        }

        if self.history.len() >= self.calls {
            if let Some(oldest) = self.history.pop_front() {
                let ready_at = oldest + self.period;
                let wait = ready_at.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    debug!(wait_ms = wait.as_millis() as u64, "throttling request");
                    thread::sleep(wait);
                }
            }
        }

        self.history.push_back(Instant::now());
    }

    /// Run `op` once the window permits it. The result is passed through untouched.
    pub fn call<R, F>(&mut self, op: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.acquire();
        op()
    }
}
