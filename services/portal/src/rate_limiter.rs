//! Login throttle for slowing down password guessing
//!
//! Mirrors the backend policy on the client so a locked user gets an answer
//! without a round trip: after too many failures inside the window, further
//! attempts for that username are refused until the lockout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ThrottleConfig;
use crate::error::{ApiError, ApiResult};

/// Failure record for one username
#[derive(Debug)]
struct ThrottleEntry {
    /// Failures counted in the current window
    failures: u32,
    /// Last failure time
    last_failure: Instant,
    /// Lockout expiration time
    locked_until: Option<Instant>,
}

/// Login throttle
#[derive(Debug, Clone)]
pub struct LoginThrottle {
    config: ThrottleConfig,
    entries: Arc<Mutex<HashMap<String, ThrottleEntry>>>,
}

impl LoginThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refuse the attempt if `username` is locked out
    pub async fn check(&self, username: &str) -> ApiResult<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let Some(entry) = entries.get_mut(&key(username)) else {
            return Ok(());
        };

        match entry.locked_until {
            Some(until) if now < until => Err(ApiError::TooManyAttempts {
                retry_after: until - now,
            }),
            Some(_) => {
                // Lockout over, start afresh
                entry.failures = 0;
                entry.locked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt, locking the user out once over the limit
    pub async fn record_failure(&self, username: &str) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let entry = entries.entry(key(username)).or_insert(ThrottleEntry {
            failures: 0,
            last_failure: now,
            locked_until: None,
        });

        // Check if window has expired
        if now.duration_since(entry.last_failure) >= self.config.window() {
            entry.failures = 0;
        }

        entry.failures += 1;
        entry.last_failure = now;

        if entry.failures >= self.config.max_attempts {
            entry.locked_until = Some(now + self.config.lockout());
            warn!(
                "Locked login for {} for {} seconds after {} failures",
                username, self.config.lockout_secs, entry.failures
            );
        }
    }

    /// Forget the failures of `username` after a successful login
    pub async fn record_success(&self, username: &str) {
        if self.entries.lock().await.remove(&key(username)).is_some() {
            info!("Cleared failed login attempts for {}", username);
        }
    }

    /// Remaining lockout for `username`
    pub async fn locked_for(&self, username: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(&key(username))
            .and_then(|entry| entry.locked_until)
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }
}

fn key(username: &str) -> String {
    username.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn throttle() -> LoginThrottle {
        LoginThrottle::new(ThrottleConfig {
            max_attempts: 3,
            window_secs: 60,
            lockout_secs: 120,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_max_failures() {
        let throttle = throttle();

        for _ in 0..2 {
            throttle.record_failure("Cheikh").await;
            assert_ok!(throttle.check("cheikh").await);
        }
        throttle.record_failure("cheikh").await;

        let err = assert_err!(throttle.check("CHEIKH").await);
        assert!(matches!(err, ApiError::TooManyAttempts { retry_after } if retry_after == Duration::from_secs(120)));
        assert_ok!(throttle.check("someone-else").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lockout_expires() {
        let throttle = throttle();
        for _ in 0..3 {
            throttle.record_failure("cheikh").await;
        }
        assert!(throttle.locked_for("cheikh").await.is_some());

        tokio::time::advance(Duration::from_secs(121)).await;

        assert_ok!(throttle.check("cheikh").await);
        assert_eq!(throttle.locked_for("cheikh").await, None);
        // The counter restarted
        throttle.record_failure("cheikh").await;
        assert_ok!(throttle.check("cheikh").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_failures() {
        let throttle = throttle();
        throttle.record_failure("cheikh").await;
        throttle.record_failure("cheikh").await;

        tokio::time::advance(Duration::from_secs(61)).await;

        throttle.record_failure("cheikh").await;
        assert_ok!(throttle.check("cheikh").await);
    }

    #[tokio::test]
    async fn test_success_clears_failures() {
        let throttle = throttle();
        throttle.record_failure("cheikh").await;
        throttle.record_failure("cheikh").await;
        throttle.record_success("cheikh").await;
        throttle.record_failure("cheikh").await;
        throttle.record_failure("cheikh").await;

        assert_ok!(throttle.check("cheikh").await);
    }
}
