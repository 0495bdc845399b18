//! Retry with exponential backoff for transport failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How backends retry transient transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
        }
    }

    /// Delay before attempt number `attempt` (1-based, so attempt 1 has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    /// Run a blocking operation, retrying retryable errors.
    ///
    /// Only errors for which [`NotesyncError::is_retryable`] holds are
    /// retried; everything else is returned immediately.
    ///
    /// [`NotesyncError::is_retryable`]: crate::error::NotesyncError::is_retryable
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max => {
                    attempt += 1;
                    let delay = self.backoff_for(attempt);
                    log::warn!(
                        "[Retry] {} failed ({}), attempt {}/{} in {:?}",
                        what,
                        e,
                        attempt,
                        max,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotesyncError;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::ZERO);
        assert_eq!(policy.backoff_for(2), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let mut calls = 0;
        let result = fast(3).run("upload", || {
            calls += 1;
            if calls < 3 {
                Err(NotesyncError::Transport("reset".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = fast(2).run("upload", || {
            calls += 1;
            Err(NotesyncError::Transport("reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = fast(5).run("rename", || {
            calls += 1;
            Err(NotesyncError::NameCollision("a.org".into()))
        });
        assert!(matches!(result, Err(NotesyncError::NameCollision(_))));
        assert_eq!(calls, 1);
    }
}
