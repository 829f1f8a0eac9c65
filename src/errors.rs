// src/errors.rs
//! Error taxonomy shared by adapters, the pipeline and the capabilities it consumes.

use serde::Serialize;
use thiserror::Error;

/// Coarse class of a fetch failure; drives the disable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    NotFound,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::NotFound => "not_found",
        }
    }
}

/// Raised by source adapters and discovery strategies. Never crashes a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl FetchFailure {
    pub fn transient(msg: impl Into<String>) -> Self {
        FetchFailure::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        FetchFailure::Permanent(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FetchFailure::NotFound(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchFailure::Transient(_) => FailureKind::Transient,
            FetchFailure::Permanent(_) => FailureKind::Permanent,
            FetchFailure::NotFound(_) => FailureKind::NotFound,
        }
    }

    /// Status-code classification used by every HTTP-backed adapter.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            404 | 410 => FetchFailure::not_found(format!("HTTP {status} for {url}")),
            403 | 408 | 425 | 429 => FetchFailure::transient(format!("HTTP {status} for {url}")),
            s if s >= 500 => FetchFailure::transient(format!("HTTP {s} for {url}")),
            s => FetchFailure::permanent(format!("HTTP {s} for {url}")),
        }
    }
}

/// Failure of the summarization capability. Always item-local and retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizeError {
    #[error("summarization quota exhausted: {0}")]
    Quota(String),
    #[error("summarization timed out")]
    Timeout,
    #[error("summarization provider error: {0}")]
    Provider(String),
    #[error("unusable model output: {0}")]
    BadOutput(String),
    #[error("summarization is disabled")]
    Disabled,
}

/// Repository failures. Unlike fetch failures these abort a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery transport error: {0}")]
    Transport(String),
    #[error("destination rejected the message: {0}")]
    Rejected(String),
    #[error("destination {0} is archived")]
    Archived(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FetchFailure::from_status(404, "u").kind(), FailureKind::NotFound);
        assert_eq!(FetchFailure::from_status(410, "u").kind(), FailureKind::NotFound);
        assert_eq!(FetchFailure::from_status(401, "u").kind(), FailureKind::Permanent);
        assert_eq!(FetchFailure::from_status(400, "u").kind(), FailureKind::Permanent);
        assert_eq!(FetchFailure::from_status(429, "u").kind(), FailureKind::Transient);
        assert_eq!(FetchFailure::from_status(503, "u").kind(), FailureKind::Transient);
    }
}
