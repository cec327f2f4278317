//! Bounded retries with exponential backoff around the delivery client.
//!
//! The backoff sleep blocks the calling thread. The pipeline has
//! exactly one message in flight (broker prefetch = 1), and nothing else may
//! be delivered while this one is being retried.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use skyrelay_core::WeatherRecord;

use crate::delivery::{DeliveryClient, DeliveryError, DeliveryOutcome};

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delivery attempts per message (values below 1 act as 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed):
    /// `base_delay * 2^(attempt - 1)`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Blocks the current thread between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Production sleeper: `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S> Sleeper for &S
where
    S: Sleeper + ?Sized,
{
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Successful delivery after `attempts` tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub id: Option<String>,
    pub attempts: u32,
}

/// Every attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("max retries exceeded after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last_error: DeliveryError,
}

/// Call `client` up to `policy.attempts()` times, sleeping between failures.
///
/// No sleep follows the final attempt.
pub fn deliver_with_retry<C, S>(
    client: &C,
    sleeper: &S,
    policy: &RetryPolicy,
    record: &WeatherRecord,
) -> Result<Delivered, RetryExhausted>
where
    C: DeliveryClient + ?Sized,
    S: Sleeper + ?Sized,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let error = match client.deliver(record) {
            DeliveryOutcome::Delivered { id } => {
                return Ok(Delivered {
                    id,
                    attempts: attempt,
                });
            }
            DeliveryOutcome::RetriableFailure(error) => error,
        };

        if attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            max_retries = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            city = %record.city,
            "retry_attempt"
        );
        sleeper.sleep(delay);
        attempt += 1;
    }
}
