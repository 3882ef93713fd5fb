//! Error types for ferrite-copy
//!
//! Store-level failures live in [`crate::store::StoreError`]; everything the
//! engine itself can refuse or give up on is a [`CopyError`].

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for a copy run
#[derive(Error, Debug)]
pub enum CopyError {
    /// Invalid or unsupported configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection string could not be parsed
    #[error("invalid connection string: {0}")]
    InvalidUri(String),

    /// Source and destination resolve to the same endpoint
    #[error("source cannot equal destination ({0})")]
    SameEndpoint(String),

    /// Destination already holds keys and the run does not allow it
    #[error("destination not empty")]
    DestinationNotEmpty,

    /// Operator declined the confirmation prompt
    #[error("declined by operator")]
    Declined,

    /// Run aborted before or during enumeration
    #[error("aborted: {0}")]
    Aborted(String),

    /// Fail-fast stopped the run at the first failed or mismatched key
    #[error("fail-fast: stopped at key {key}")]
    FailFast {
        /// Printable form of the offending key
        key: String,
    },

    /// Run was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Unrecoverable store error (connection loss, protocol violation)
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for copy runs
pub type Result<T> = std::result::Result<T, CopyError>;

impl CopyError {
    /// Returns true for errors raised before any key was processed
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            CopyError::Config(_)
                | CopyError::InvalidUri(_)
                | CopyError::SameEndpoint(_)
                | CopyError::DestinationNotEmpty
                | CopyError::Declined
        )
    }

    /// Process exit code for a CLI wrapper. Every error is a failure exit.
    pub fn exit_code(&self) -> u8 {
        match self {
            CopyError::Config(_) | CopyError::InvalidUri(_) => 2,
            CopyError::Cancelled => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_classification() {
        assert!(CopyError::Declined.is_preflight());
        assert!(CopyError::SameEndpoint("redis://a:6379/0".into()).is_preflight());
        assert!(!CopyError::FailFast { key: "\"k\"".into() }.is_preflight());
        assert!(!CopyError::Cancelled.is_preflight());
    }

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errors = [
            CopyError::Config("x".into()),
            CopyError::DestinationNotEmpty,
            CopyError::Declined,
            CopyError::Aborted("x".into()),
            CopyError::FailFast { key: "k".into() },
            CopyError::Cancelled,
            CopyError::Store(StoreError::ConnectionClosed),
        ];
        for err in errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: CopyError = StoreError::Protocol("bad frame".into()).into();
        assert_eq!(err.to_string(), "protocol error: bad frame");
    }
}
