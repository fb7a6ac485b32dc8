//! Retry-with-backoff and circuit breaker wrapping the S3 backend's network
//! calls.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngExt;

use crate::error::{Error, ErrorKind};

const BASE_DELAY: Duration = Duration::from_millis(100);
const BACKOFF_FACTOR: u32 = 2;
const MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_FAILURE_WINDOW: Duration = Duration::from_secs(60);
const BREAKER_OPEN_DURATION: Duration = Duration::from_secs(15 * 60);

/// Runs `attempt` with exponential backoff and jitter, retrying only on
/// `transient` errors, up to [`MAX_ATTEMPTS`] total attempts.
pub async fn retry_with_backoff<F, Fut, T>(mut attempt: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = BASE_DELAY;
    for attempt_no in 1..=MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::Transient && attempt_no < MAX_ATTEMPTS => {
                let jitter_ms = rand::rng().random_range(0..=delay.as_millis() as u64);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                delay = (delay * BACKOFF_FACTOR).min(MAX_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop always returns within MAX_ATTEMPTS iterations")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
}

struct BreakerInner {
    state: BreakerState,
    failure_times: Vec<Instant>,
    opened_at: Option<Instant>,
}

/// Opens after [`BREAKER_FAILURE_THRESHOLD`] consecutive failures within
/// [`BREAKER_FAILURE_WINDOW`]; stays open for [`BREAKER_OPEN_DURATION`]
/// before allowing another attempt through.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        CircuitBreaker {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_times: Vec::new(),
                opened_at: None,
            }),
        }
    }

    /// Returns `Err(transient)` immediately if the breaker is open (and
    /// its open period hasn't elapsed yet); otherwise permits the call.
    pub fn check(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= BREAKER_OPEN_DURATION {
                    inner.state = BreakerState::Closed;
                    inner.failure_times.clear();
                    inner.opened_at = None;
                    return Ok(());
                }
            }
            return Err(Error::transient("circuit breaker open"));
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.failure_times.clear();
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        let now = Instant::now();
        inner.failure_times.retain(|t| now.duration_since(*t) <= BREAKER_FAILURE_WINDOW);
        inner.failure_times.push(now);
        if inner.failure_times.len() as u32 >= BREAKER_FAILURE_THRESHOLD {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().expect("circuit breaker mutex poisoned").state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::transient("not yet"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_retry_fatal_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), Error> = retry_with_backoff(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::fatal("boom"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..BREAKER_FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        assert!(breaker.check().is_err());
    }

    #[test]
    fn breaker_resets_on_success() {
        let breaker = CircuitBreaker::new();
        for _ in 0..(BREAKER_FAILURE_THRESHOLD - 1) {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
