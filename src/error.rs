//! Crate-wide error type.
//!
//! Every fallible operation returns [`Result`]. The variants follow the failure
//! kinds of the pipeline so the orchestrator can decide between skipping an item,
//! retrying a batch, or aborting a phase.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Credential missing or rejected. Fatal for the run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A remote service could not be reached. Fatal for the phase.
    #[error("cannot reach {service}: {message}")]
    Connectivity {
        service: &'static str,
        message: String,
    },

    /// A referenced resource does not exist. Logged and skipped.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record could not be decoded. Logged and skipped.
    #[error("parse error: {0}")]
    Parse(String),

    /// Temporary failure, retried once before degrading.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A data invariant was broken. The offending item is dropped.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Bad command line or snapshot content.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("graph store error: {0}")]
    Graph(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for a run that aborted with this error.
    ///
    /// # Returns
    /// * `2` - invalid input (bad flags, unreadable snapshot)
    /// * `1` - everything else, including connection and authentication failures
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InvalidInput(_) | Error::InvalidCidr(_) | Error::Parse(_) | Error::Json(_) => 2,
            _ => 1,
        }
    }

    /// Whether a batch that failed with this error deserves another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::Timeout { .. } | Error::Connectivity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Auth("expired".into()).exit_code(), 1);
        assert_eq!(
            Error::Connectivity {
                service: "graph store",
                message: "refused".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(Error::InvalidInput("no data file".into()).exit_code(), 2);
        assert_eq!(Error::InvalidCidr("10.0.0.0/33".into()).exit_code(), 2);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(Error::Transient("throttled".into()).is_transient());
        assert!(Error::Timeout {
            operation: "az graph query".into(),
            seconds: 600
        }
        .is_transient());
        assert!(!Error::Auth("denied".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_display() {
        let e = Error::InvalidCidr("300.1.1.1/8".into());
        assert_eq!(e.to_string(), "invalid CIDR '300.1.1.1/8'");
    }
}
