// Error module - the failure taxonomy shared by every storage collector
//
// Every error raised while talking to an array ends up here. The orchestrator
// and the collection protocol never propagate these past their own boundary;
// they are logged and recorded as a `CollectionFailure` on the server's result.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while collecting telemetry from a storage array
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Unknown storage-family tag, missing credentials or invalid target parameters.
    /// Raised before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Login failed or returned no usable token
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The array answered with a non-2xx status
    #[error("HTTP {status} from {path}: {body}")]
    Http {
        path: String,
        status: u16,
        body: String,
    },

    /// Connection refused, TLS failure, timeout, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server's time budget ran out before this step finished
    #[error("server time limit exceeded")]
    DeadlineExceeded,

    /// An underlying HTTP transport error from `reqwest`.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Some entries of a fan-out/expand step could not be fetched
    #[error("partial data: {failed} of {total} detail requests failed")]
    PartialData { failed: usize, total: usize },

    /// Unexpected payload shape
    #[error("parse error: {0}")]
    Parse(String),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The vendor CLI exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Process {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Coarse classification of a `CollectorError`, recorded in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Transport,
    PartialData,
    Parse,
}

impl CollectorError {
    /// Maps the error onto the taxonomy consumers see in `failures[].kind`
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectorError::Configuration(_) => ErrorKind::Configuration,
            CollectorError::Authentication(_) => ErrorKind::Authentication,
            CollectorError::Http { .. }
            | CollectorError::Transport(_)
            | CollectorError::DeadlineExceeded
            | CollectorError::Network(_)
            | CollectorError::Process { .. } => ErrorKind::Transport,
            CollectorError::PartialData { .. } => ErrorKind::PartialData,
            CollectorError::Parse(_) | CollectorError::Json(_) => ErrorKind::Parse,
        }
    }

    /// Shorthand for a payload that is missing an expected field
    pub fn missing(field: &str) -> Self {
        CollectorError::Parse(format!("missing field '{}'", field))
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CollectorError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            CollectorError::Http {
                path: "/".into(),
                status: 503,
                body: String::new()
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            CollectorError::PartialData { failed: 1, total: 3 }.kind(),
            ErrorKind::PartialData
        );
        assert_eq!(CollectorError::missing("name").kind(), ErrorKind::Parse);
        assert_eq!(CollectorError::DeadlineExceeded.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = CollectorError::PartialData { failed: 2, total: 5 };
        assert_eq!(err.to_string(), "partial data: 2 of 5 detail requests failed");
    }
}
