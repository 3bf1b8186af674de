//! Bounded retries with backoff, over an injectable clock.

use log::warn;
use std::fmt::Display;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    None,
    /// Waits `attempt × step` after the failed `attempt` (1-based).
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear(step) => *step * attempt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Linear(Duration::from_millis(1000)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct RetryError<E: std::error::Error + 'static> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

pub struct RetryExecutor<'c> {
    policy: RetryPolicy,
    clock: &'c dyn Clock,
}

impl<'c> RetryExecutor<'c> {
    pub fn new(policy: RetryPolicy, clock: &'c dyn Clock) -> Self {
        RetryExecutor { policy, clock }
    }

    /// Calls `op(attempt)` until it succeeds or the policy runs out of attempts.
    /// No delay follows the final attempt.
    pub fn run<T, E, F>(&self, label: impl Display, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    return Err(RetryError {
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => {
                    let delay = self.policy.backoff.delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}ms",
                        label,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
