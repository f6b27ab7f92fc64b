//! Bounded exponential backoff for dialogue requests.

use crate::config::DialogueConfig;
use crate::error::{ParleyError, Result};
use crate::pipeline::control::POLL_INTERVAL;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles after that.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(crate::defaults::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(crate::defaults::RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DialogueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Backoff before retry number `retry` with 0-25% jitter, capped at
    /// `max_delay`.
    ///
    /// The jitter fraction is the wall clock's subsecond nanos modulo 250,
    /// read as thousandths.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        self.jittered(retry, nanos)
    }

    fn jittered(&self, retry: u32, nanos: u32) -> Duration {
        let base = self.base_delay_for(retry);
        let fraction = (nanos % 250) as f64 / 1000.0;
        (base + base.mul_f64(fraction)).min(self.max_delay)
    }
}

/// Waits between attempts. Injected so tests can observe delays without
/// sleeping.
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`, giving up early when `cancelled` returns true.
    ///
    /// Returns `false` if the wait was cancelled.
    fn sleep(&self, duration: Duration, cancelled: &dyn Fn() -> bool) -> bool;
}

/// Real sleeper that re-checks cancellation every poll interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancelled: &dyn Fn() -> bool) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancelled: &dyn Fn() -> bool) -> bool {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        !cancelled()
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
///
/// `op` receives the 1-based attempt number. Transient failures that
/// exhaust the policy come back as terminal dialogue errors. Cancellation
/// before an attempt or during a backoff yields a cancelled dialogue error.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancelled: &dyn Fn() -> bool,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancelled() {
            return Err(ParleyError::dialogue_cancelled());
        }

        let error = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(ParleyError::dialogue_terminal(format!(
                "gave up after {attempt} attempts: {error}"
            )));
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient dialogue failure, backing off"
        );
        if !sleeper.sleep(delay, cancelled) {
            return Err(ParleyError::dialogue_cancelled());
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialogueErrorKind;
    use std::cell::Cell;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(p.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(p.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(p.base_delay_for(5), Duration::from_millis(1000));
        assert_eq!(p.base_delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let p = policy(10);
        for retry in 1..6 {
            let base = p.base_delay_for(retry);
            let d = p.delay_for(retry);
            assert!(d >= base, "{d:?} < {base:?}");
            assert!(d <= base.mul_f64(1.25).min(p.max_delay));
        }
    }

    #[test]
    fn test_jitter_fraction_follows_subsecond_nanos() {
        let p = policy(10);
        let near = |d: Duration, ms: f64| (d.as_secs_f64() * 1000.0 - ms).abs() < 0.01;
        assert_eq!(p.jittered(1, 0), Duration::from_millis(100));
        assert!(near(p.jittered(1, 1_000_100), 110.0));
        assert!(near(p.jittered(1, 249), 124.9));
        assert_eq!(p.jittered(5, 249), Duration::from_millis(1000));
    }

    #[test]
    fn test_succeeds_after_two_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let calls = Cell::new(0);
        let result = with_retry(&policy(4), &sleeper, &|| false, |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(ParleyError::dialogue_transient("overloaded"))
            } else {
                Ok("reply")
            }
        });
        assert_eq!(result.unwrap(), "reply");
        assert_eq!(calls.get(), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[test]
    fn test_terminal_error_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&policy(4), &sleeper, &|| false, |_| {
            calls.set(calls.get() + 1);
            Err(ParleyError::dialogue_terminal("bad request"))
        });
        assert!(matches!(
            result,
            Err(ParleyError::Dialogue { kind: DialogueErrorKind::Terminal, .. })
        ));
        assert_eq!(calls.get(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_exhausted_transient_becomes_terminal() {
        let sleeper = RecordingSleeper::new();
        let result: Result<()> = with_retry(&policy(3), &sleeper, &|| false, |_| {
            Err(ParleyError::dialogue_transient("rate limited"))
        });
        match result {
            Err(ParleyError::Dialogue { kind, message }) => {
                assert_eq!(kind, DialogueErrorKind::Terminal);
                assert!(message.contains("3 attempts"));
            }
            other => panic!("expected terminal error, got {other:?}"),
        }
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let sleeper = RecordingSleeper::new();
        let result: Result<()> = with_retry(&policy(3), &sleeper, &|| true, |_| Ok(()));
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_thread_sleeper_returns_early_on_cancel() {
        let start = Instant::now();
        assert!(!ThreadSleeper.sleep(Duration::from_secs(10), &|| true));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(ThreadSleeper.sleep(Duration::from_millis(5), &|| false));
    }
}
