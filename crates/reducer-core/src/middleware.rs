//! The `throttle(retry(breaker(...)))` wrapper chain (§9 design note),
//! expressed as small composable stages rather than a generic `tower`
//! stack: both the store facade and the sink poster wrap a single async
//! call through [`Breaker::call`] and [`retry`], so the wrapping stays
//! transparent to their callers exactly as §4.B requires.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use exponential_backoff::Backoff;
use parking_lot::Mutex;
use reducer_errors::{ReduceError, ReduceResult};
use tracing::warn;

/// Three-state circuit breaker, one instance per target (a store or a
/// sink host). Opens after `threshold` consecutive failures and stays open
/// for `reset_after` before allowing a single half-open probe through.
pub struct Breaker {
    threshold: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
}

enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

impl Breaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Breaker {
            threshold,
            reset_after,
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    fn allow_call(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_after {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.state.lock() = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        if matches!(*state, BreakerState::HalfOpen) || failures >= self.threshold {
            *state = BreakerState::Open {
                opened_at: Instant::now(),
            };
        }
    }

    /// Runs `f` if the breaker is closed (or probing half-open), and
    /// updates breaker state based on the outcome. Rejects without calling
    /// `f` while the breaker is open.
    pub async fn call<F, Fut, T>(&self, f: F) -> ReduceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ReduceResult<T>>,
    {
        if !self.allow_call() {
            return Err(ReduceError::Transport("circuit breaker open".to_string()));
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Retries `f` up to `attempts` times total (the first call plus
/// `attempts - 1` retries), honoring [`ReduceError::noretry`] and backing
/// off exponentially between attempts.
///
/// `SINK_RETRIES` (§6) is the `attempts` value used by the sink poster;
/// the store facade uses a fixed internal default (§4.B names no env var
/// for it).
pub async fn retry<F, Fut, T>(attempts: u32, mut f: F) -> ReduceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReduceResult<T>>,
{
    let backoff = Backoff::new(attempts.max(1), Duration::from_millis(20), Duration::from_secs(2));
    let mut last_err = None;
    for (attempt, delay) in (&backoff).into_iter().enumerate() {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.noretry() => return Err(err),
            Err(err) => {
                warn!(attempt, error = %err, "retrying after failure");
                last_err = Some(err);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ReduceError::Transport("retry loop produced no attempts".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let breaker = Breaker::new(2, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(ReduceError::Transport("boom".into())) })
                .await;
        }
        let result = breaker.call(|| async { Ok::<_, ReduceError>(()) }).await;
        assert!(result.is_err(), "breaker should reject while open");
    }

    #[tokio::test]
    async fn retry_stops_on_noretry_errors() {
        let calls = Counter::new(0);
        let result: ReduceResult<()> = retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ReduceError::Duplicate { id: "x".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "noretry errors must not be retried");
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = Counter::new(0);
        let result = retry(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ReduceError::Transport("transient".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
    }
}
