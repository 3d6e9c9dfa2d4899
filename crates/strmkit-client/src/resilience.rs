//! Retry with exponential backoff, the circuit breaker, and the backoff
//! schedule used for automatic reconnection (§4.4).

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn data_plane(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn control_plane(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(10),
        }
    }

    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retries `op` per [`RetryPolicy`], skipping non-retriable errors (§7: a
/// `ProtocolError` such as topic-already-exists is surfaced immediately).
pub async fn retry<F, Fut, T>(
    policy: &RetryPolicy,
    metrics: &dyn Metrics,
    api_key: i16,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retriable() && attempt < policy.max_retries => {
                metrics.retry_attempted(api_key, attempt);
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed,
    Open {
        opened_at: Instant,
        probe_dispatched: bool,
    },
}

pub struct CircuitBreaker {
    label: &'static str,
    failure_threshold: u32,
    break_duration: Duration,
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(label: &'static str, failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            label,
            failure_threshold,
            break_duration,
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Runs `op` through the breaker. The breaker is evaluated before `op`
    /// ever runs — an open breaker short-circuits with `CircuitOpen` without
    /// attempting I/O, and it wraps retry: a caller composes
    /// `breaker.guard(|| retry(...))`, not the other way around.
    pub async fn guard<F, Fut, T>(&self, metrics: &dyn Metrics, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let is_probe = {
            let mut state = self.state.lock().await;
            match &mut *state {
                BreakerState::Closed => false,
                BreakerState::Open {
                    opened_at,
                    probe_dispatched,
                } => {
                    if opened_at.elapsed() < self.break_duration || *probe_dispatched {
                        return Err(Error::CircuitOpen(self.label));
                    }
                    *probe_dispatched = true;
                    true
                }
            }
        };

        match op().await {
            Ok(v) => {
                let mut state = self.state.lock().await;
                if !matches!(*state, BreakerState::Closed) {
                    metrics.circuit_closed(self.label);
                }
                *state = BreakerState::Closed;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(v)
            }
            Err(e) => {
                if is_probe {
                    let mut state = self.state.lock().await;
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                        probe_dispatched: false,
                    };
                    metrics.circuit_opened(self.label);
                } else if e.is_retriable() {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= self.failure_threshold {
                        let mut state = self.state.lock().await;
                        *state = BreakerState::Open {
                            opened_at: Instant::now(),
                            probe_dispatched: false,
                        };
                        metrics.circuit_opened(self.label);
                    }
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    async fn is_open(&self) -> bool {
        matches!(*self.state.lock().await, BreakerState::Open { .. })
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).unwrap_or(Duration::from_secs(60))
    }
}
