//! Error taxonomy.
//!
//! Request-level errors (`RequestError`) are fatal to the whole request and
//! are raised before any worker is dispatched. Worker-level errors
//! (`WorkerError`) are recorded on the affected type only.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Wire name of an error, shared by worker and request level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    PreconditionError,
    QuotaExceededError,
    Timeout,
    Unauthorized,
    RateLimited,
    TransientNetworkError,
    ModelOutputError,
    NormalizationError,
    DependencyFailed,
    Cancelled,
    TransportError,
    /// A worker task crashed instead of returning
    InternalError,
}

impl ErrorKind {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::TransientNetworkError
        )
    }
}

/// Kind + message pair recorded on a `WorkerResult` and sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Classified failure of a single worker invocation.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model service rejected credentials: {0}")]
    Unauthorized(String),

    #[error("model service rate limit reached: {0}")]
    RateLimited(String),

    #[error("model output did not match the expected schema: {0}")]
    ModelOutput(String),

    #[error("network error talking to model service: {0}")]
    TransientNetwork(String),

    #[error("worker cancelled")]
    Cancelled,

    #[error("worker panicked")]
    Panicked,
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Timeout(_) => ErrorKind::Timeout,
            WorkerError::Unauthorized(_) => ErrorKind::Unauthorized,
            WorkerError::RateLimited(_) => ErrorKind::RateLimited,
            WorkerError::ModelOutput(_) => ErrorKind::ModelOutputError,
            WorkerError::TransientNetwork(_) => ErrorKind::TransientNetworkError,
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::Panicked => ErrorKind::InternalError,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind(), self.to_string())
    }
}

/// Failure that rejects a whole request before dispatch.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("no analysis types requested")]
    EmptyTypes,

    #[error("unknown analysis type(s) {}; valid types: {}", .unknown.join(", "), .valid.join(", "))]
    UnknownTypes { unknown: Vec<String>, valid: Vec<String> },

    #[error("circular dependency among analysis types: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("either article_url or article_text must be provided")]
    MissingArticle,

    #[error("correlation id {0} is already in use by an active request")]
    DuplicateCorrelationId(String),

    #[error("article extraction failed: {0}")]
    Precondition(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::EmptyTypes
            | RequestError::UnknownTypes { .. }
            | RequestError::DependencyCycle(_)
            | RequestError::MissingArticle
            | RequestError::DuplicateCorrelationId(_) => ErrorKind::ValidationError,
            RequestError::Precondition(_) => ErrorKind::PreconditionError,
            RequestError::QuotaExceeded(_) => ErrorKind::QuotaExceededError,
            RequestError::Cancelled => ErrorKind::TransportError,
        }
    }

    /// Valid type ids, when the request was rejected for naming unknown ones.
    pub fn valid_types(&self) -> Option<&[String]> {
        match self {
            RequestError::UnknownTypes { valid, .. } => Some(valid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_map_to_distinct_kinds() {
        let errors = [
            WorkerError::Timeout(Duration::from_secs(1)),
            WorkerError::Unauthorized("bad key".into()),
            WorkerError::RateLimited("slow down".into()),
            WorkerError::ModelOutput("missing field".into()),
            WorkerError::TransientNetwork("reset".into()),
            WorkerError::Cancelled,
            WorkerError::Panicked,
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
        assert!(WorkerError::RateLimited(String::new()).kind().is_retryable());
        assert!(!WorkerError::Unauthorized(String::new()).kind().is_retryable());
    }

    #[test]
    fn unknown_types_message_lists_valid_ids() {
        let err = RequestError::UnknownTypes {
            unknown: vec!["horoscope".into()],
            valid: vec!["bias".into(), "jargon".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("horoscope"));
        assert!(msg.contains("bias, jargon"));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.valid_types().map(|v| v.len()), Some(2));
    }

    #[test]
    fn error_kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::DependencyFailed).unwrap();
        assert_eq!(json, "\"DependencyFailed\"");
    }
}
