// SPDX-License-Identifier: PMPL-1.0-or-later
//! Error types for the CIM SPARQL clients.
//!
//! All fallible operations in this crate return [`Result<T>`]. Errors fall into
//! three operator-facing categories (see [`ErrorCategory`]): the backend could
//! not be reached or parsed, the backend answered but the data is wrong, or the
//! client itself is misconfigured.

use thiserror::Error;

/// Operator-facing classification of a [`SparqlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Deployment problem: bad backend kind, missing credentials, unsupported call.
    Configuration,
    /// Network or backend problem: unreachable host, non-2xx, unparseable body.
    Transport,
    /// The backend answered, but the result has the wrong shape or content.
    Data,
}

/// Error type for SPARQL client operations.
#[derive(Error, Debug)]
pub enum SparqlError {
    /// Invalid or incomplete service configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network-level failure (connect, TLS, timeout) from `reqwest`.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success HTTP status.
    #[error("Backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response body is not a valid SPARQL results document.
    #[error("Malformed SPARQL result: {0}")]
    MalformedResult(String),

    /// The query produced a result of the wrong kind (e.g. ASK instead of SELECT).
    #[error("Invalid result shape: expected {expected}, got {found}")]
    InvalidResultShape {
        expected: &'static str,
        found: &'static str,
    },

    /// A result row binds a different variable set than the header declares.
    #[error("Column mismatch in row {row}: header {expected:?}, row {found:?}")]
    ColumnConsistency {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// All retry attempts failed; carries the last underlying error.
    #[error("Query failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<SparqlError>,
    },

    /// The active backend does not provide this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: String,
    },

    /// The embedded store rejected a query, update or load.
    #[error("Store error: {0}")]
    Store(String),

    /// Local I/O failure (reading upload content or a CA bundle).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SparqlError {
    /// Whether the retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SparqlError::Transport(_)
                | SparqlError::Status { .. }
                | SparqlError::MalformedResult(_)
                | SparqlError::Io(_)
        )
    }

    /// Classify the error for reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SparqlError::Configuration(_) | SparqlError::Unsupported { .. } => {
                ErrorCategory::Configuration
            }
            SparqlError::Transport(_)
            | SparqlError::Status { .. }
            | SparqlError::MalformedResult(_)
            | SparqlError::RetryExhausted { .. }
            | SparqlError::Io(_) => ErrorCategory::Transport,
            SparqlError::InvalidResultShape { .. }
            | SparqlError::ColumnConsistency { .. }
            | SparqlError::Store(_) => ErrorCategory::Data,
        }
    }
}

impl From<serde_json::Error> for SparqlError {
    fn from(err: serde_json::Error) -> Self {
        SparqlError::MalformedResult(err.to_string())
    }
}

/// Crate-level result alias using [`SparqlError`].
pub type Result<T> = std::result::Result<T, SparqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SparqlError::Status {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned status 503: Service Unavailable");

        let err = SparqlError::Unsupported {
            operation: "set_namespace",
            backend: "BLAZEGRAPH".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "set_namespace is not supported by the BLAZEGRAPH backend"
        );
    }

    #[test]
    fn test_retry_exhausted_keeps_cause() {
        let err = SparqlError::RetryExhausted {
            attempts: 3,
            source: Box::new(SparqlError::MalformedResult("eof".into())),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SparqlError::MalformedResult("x".into()).is_retryable());
        assert!(SparqlError::Status { status: 500, message: String::new() }.is_retryable());
        assert!(!SparqlError::Configuration("x".into()).is_retryable());
        assert!(!SparqlError::ColumnConsistency {
            row: 0,
            expected: vec![],
            found: vec![]
        }
        .is_retryable());
        assert!(!SparqlError::InvalidResultShape {
            expected: "solutions",
            found: "boolean"
        }
        .is_retryable());
    }

    #[test]
    fn test_json_error_is_malformed_result() {
        let err: SparqlError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SparqlError::MalformedResult(_)));
        assert_eq!(err.category(), ErrorCategory::Transport);
    }
}
