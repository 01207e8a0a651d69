//! Typed error taxonomy.
//!
//! Two families of failure are worth naming:
//!
//! - [`OracleError`]: anything that goes wrong talking to the embedding or
//!   chat model over HTTP. Callers in [`rag`](crate::rag) and
//!   [`judge`](crate::judge) convert these into sentinel values so a benchmark
//!   run always completes.
//! - [`ConfigurationError`]: an operation was asked to do something that
//!   cannot succeed (unknown collection, missing path). Fatal for that one
//!   operation only.
//!
//! Everything else flows through `anyhow` at command boundaries.

use std::path::PathBuf;

/// Failure while calling the model oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("transport failure calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed oracle output: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Map a reqwest error to the taxonomy, keeping timeouts distinct.
    pub fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            OracleError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Timeout { .. } | OracleError::Transport { .. } => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::Malformed(_) => false,
        }
    }
}

/// Invalid request against the configured system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown collection '{0}': expected one of docs, code, combined")]
    UnknownCollection(String),

    #[error("source path does not exist: {}", .0.display())]
    MissingPath(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let rate_limited = OracleError::Status {
            endpoint: "/api/chat".into(),
            status: 429,
            body: String::new(),
        };
        let bad_request = OracleError::Status {
            endpoint: "/api/chat".into(),
            status: 400,
            body: String::new(),
        };
        assert!(rate_limited.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!OracleError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn unknown_collection_message_lists_choices() {
        let msg = ConfigurationError::UnknownCollection("blog".into()).to_string();
        assert!(msg.contains("blog"));
        assert!(msg.contains("docs, code, combined"));
    }
}
