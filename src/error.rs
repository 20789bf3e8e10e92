//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// A denied call is not an error: it is reported as
/// [`Admission::Rejected`](crate::ratelimit::Admission::Rejected).
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// The policy has an empty key or a non-positive limit or window
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// The counter store could not execute the counting transaction
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// The counting script could not be registered with the store
    #[error("Failed to register limiter script: {0}")]
    ScriptRegistration(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether this error came from the counter store rather than the caller.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, TurnstileError::StoreUnavailable(_))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
