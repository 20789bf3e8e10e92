//! Policy descriptors for guarded operations.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Longest window the store accepts: Redis TTLs are signed 64-bit milliseconds.
const MAX_WINDOW_MS: u128 = i64::MAX as u128;

/// Immutable admission policy attached to a guarded operation.
///
/// Operations that share a `key` share one counter, whatever their
/// individual limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// The rate-limited subject, e.g. an origin address
    pub key: String,
    /// Maximum admitted calls per window
    pub limit: u64,
    /// Length of the counting window
    pub window: Duration,
    /// Returned to the caller in place of the operation's result on denial
    pub rejection_message: String,
}

impl Policy {
    /// Create a new policy. Call [`Policy::validate`] before use.
    pub fn new(
        key: impl Into<String>,
        limit: u64,
        window: Duration,
        rejection_message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            limit,
            window,
            rejection_message: rejection_message.into(),
        }
    }

    /// Check that the key is non-empty and that limit and window are positive.
    ///
    /// The window must be at least one millisecond, the store's TTL resolution,
    /// and no longer than the store can express as a TTL.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(TurnstileError::InvalidPolicy(
                "key must not be empty".to_string(),
            ));
        }

        if self.limit == 0 {
            return Err(TurnstileError::InvalidPolicy(format!(
                "limit for key '{}' must be positive",
                self.key
            )));
        }

        if self.window.as_millis() == 0 {
            return Err(TurnstileError::InvalidPolicy(format!(
                "window for key '{}' must be at least 1ms",
                self.key
            )));
        }

        if self.window.as_millis() > MAX_WINDOW_MS {
            return Err(TurnstileError::InvalidPolicy(format!(
                "window for key '{}' exceeds {}ms",
                self.key, MAX_WINDOW_MS
            )));
        }

        Ok(())
    }

    /// Window length in whole milliseconds, as passed to the store.
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{:?}", self.key, self.limit, self.window)
    }
}
