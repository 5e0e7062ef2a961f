//! Bounded retry with exponential backoff for remote calls.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default number of attempts (first call included).
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Maps a zero-based attempt index to the delay before the next attempt.
pub type BackoffFn = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleeps for `delay`.
    fn sleep(&self, delay: Duration);
}

/// Sleeper backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// `2^attempt` seconds plus up to one second of jitter.
pub fn exponential_jitter(attempt: usize) -> Duration {
    let capped = attempt.min(6) as u32;
    let base = f64::from(1u32 << capped);
    Duration::from_secs_f64(base + rand::random::<f64>())
}

/// Retry policy shared by the embedding, generation and content clients.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: BackoffFn,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// Builds a policy with jittered exponential backoff.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(exponential_jitter),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replaces the backoff function.
    pub fn with_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Replaces the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Maximum attempts, first call included.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the zero-based attempt index. Non-retryable errors are
    /// returned as-is; exhausting attempts yields [`Error::RemoteCall`].
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(usize) -> Result<T>,
    {
        let mut attempt = 0usize;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt + 1 >= self.max_attempts {
                        warn!(operation, attempts = attempt + 1, error = %err, "giving up");
                        return Err(Error::RemoteCall {
                            operation: operation.to_string(),
                            attempts: attempt + 1,
                            source: Box::new(err),
                        });
                    }
                    let delay = (self.backoff)(attempt);
                    debug!(operation, attempt, ?delay, error = %err, "retrying after backoff");
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requested delays instead of sleeping.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    pub(crate) fn instant_policy(max_attempts: usize) -> (RetryPolicy, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::new(max_attempts).with_sleeper(sleeper.clone());
        (policy, sleeper)
    }

    #[test]
    fn succeeds_after_two_transient_failures() {
        let (policy, sleeper) = instant_policy(3);
        let value = policy
            .run("embed", |attempt| {
                if attempt < 2 {
                    Err(Error::Transient("rate limited".into()))
                } else {
                    Ok(attempt)
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 2);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausting_attempts_returns_remote_call_error() {
        let (policy, sleeper) = instant_policy(3);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("embed", |_| {
                calls += 1;
                Err(Error::Transient("timeout".into()))
            })
            .expect_err("all attempts fail");
        assert_eq!(calls, 3);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
        match err {
            Error::RemoteCall { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RemoteCall, got {other:?}"),
        }
    }

    #[test]
    fn permanent_errors_skip_retries() {
        let (policy, sleeper) = instant_policy(5);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("embed", |_| {
                calls += 1;
                Err(Error::Remote {
                    status: 401,
                    body: "invalid key".into(),
                })
            })
            .expect_err("permanent failure");
        assert_eq!(calls, 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
        assert!(matches!(err, Error::Remote { status: 401, .. }));
    }

    #[test]
    fn backoff_grows_exponentially_with_bounded_jitter() {
        for attempt in 0..4 {
            let delay = exponential_jitter(attempt).as_secs_f64();
            let base = f64::from(1u32 << attempt);
            assert!(delay >= base && delay < base + 1.0, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn custom_backoff_is_used() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::new(3)
            .with_backoff(|attempt| Duration::from_millis(10 * (attempt as u64 + 1)))
            .with_sleeper(sleeper.clone());
        let _ = policy.run::<(), _>("op", |_| Err(Error::Transient("x".into())));
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }
}
