//! Reconnect delay schedule
//!
//! [`BackoffPolicy`] is a pure function of the attempt number. Callers own
//! the attempt counter, which keeps the policy shareable between any number
//! of reconnecting components.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

/// Exponential backoff with symmetric random jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl BackoffPolicy {
    /// Create a policy.
    ///
    /// `jitter` may be 1.0 or more; delays that would go negative are
    /// clamped to zero.
    pub fn new(
        base: Duration,
        max: Duration,
        factor: f64,
        jitter: f64,
    ) -> Result<Self, ConfigError> {
        if max < base {
            return Err(ConfigError::invalid(
                "backoff.max",
                format!("{:?} is below base delay {:?}", max, base),
            ));
        }
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::invalid(
                "backoff.factor",
                format!("{} must be a finite value >= 1", factor),
            ));
        }
        if !jitter.is_finite() || jitter < 0.0 {
            return Err(ConfigError::invalid(
                "backoff.jitter",
                format!("{} must be a finite non-negative value", jitter),
            ));
        }
        Ok(Self {
            base,
            max,
            factor,
            jitter,
        })
    }

    /// Delay of the first retry
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Ceiling applied before jitter
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before retry number `attempt` (0-based), using the thread RNG
    pub fn attempt(&self, attempt: u32) -> Duration {
        self.attempt_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Same as [`attempt`](Self::attempt) with a caller-supplied RNG
    pub fn attempt_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if attempt == 0 {
            return self.base;
        }

        let delay = self.unjittered(attempt);
        if self.jitter == 0.0 {
            return delay;
        }

        let scale = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let secs = delay.as_secs_f64() * scale;
        if secs <= 0.0 {
            Duration::ZERO
        } else {
            // Jitter above a ceiling near Duration::MAX saturates
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        }
    }

    /// `min(base * factor^attempt, max)` without jitter
    pub fn unjittered(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::try_from_secs_f64(secs).unwrap_or(self.max)
        }
    }
}

/// Run `op` until it succeeds, sleeping per `policy` between failures.
///
/// `op` receives the 0-based attempt number. With `max_attempts` set, the
/// last error is returned once that many attempts have failed.
pub async fn retry<T, E, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: Option<u32>,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let failed = attempt.saturating_add(1);
                if max_attempts.is_some_and(|max| failed >= max) {
                    tracing::error!(attempts = failed, error = %e, "Giving up after retries");
                    return Err(e);
                }

                let delay = policy.attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = failed;
            }
        }
    }
}
