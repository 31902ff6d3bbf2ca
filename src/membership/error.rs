//! Error types for membership resolution.
//!
//! Errors are classified so the retry loop can tell "keep polling" from
//! "abort now".

use std::time::Duration;

use thiserror::Error;

use crate::client::ProbeError;

/// Error type for membership resolution
#[derive(Error, Debug)]
pub enum MembershipError {
    /// Condition expected to clear on its own (e.g. another join in flight)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Condition that retrying cannot fix
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Cluster probe failure, classified by the probe
    #[error("Cluster probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Cancellation was requested by the caller
    #[error("Membership resolution cancelled")]
    Cancelled,

    /// `max_attempts` reached while the failure was still transient
    #[error("Gave up after {attempts} attempts: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },

    /// Deadline elapsed while the failure was still transient
    #[error("Deadline of {deadline:?} exceeded after {attempts} attempts: {last_error}")]
    DeadlineExceeded {
        deadline: Duration,
        attempts: u32,
        last_error: String,
    },
}

impl MembershipError {
    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            MembershipError::Transient(_) => true,
            MembershipError::Probe(e) => e.is_transient(),
            MembershipError::Fatal(_)
            | MembershipError::Cancelled
            | MembershipError::AttemptsExhausted { .. }
            | MembershipError::DeadlineExceeded { .. } => false,
        }
    }
}

/// Result type alias for membership operations
pub type Result<T> = std::result::Result<T, MembershipError>;
