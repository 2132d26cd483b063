//! Error types for the liquidata engine.

use crate::{MutationId, RecordId};
use thiserror::Error;

/// All possible errors from the liquidata engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Ingestion errors
    #[error("malformed record {}: {reason}", display_id(.id))]
    MalformedRecord {
        id: Option<RecordId>,
        reason: String,
    },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Remote store errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("change feed lost: {0}")]
    FeedLost(String),

    #[error("mutation rejected for {ids:?}: {cause}")]
    Mutation { ids: Vec<RecordId>, cause: String },

    // Cache state errors
    #[error("cache already initialized")]
    AlreadyInitialized,

    #[error("unknown or already resolved mutation: {0}")]
    UnknownMutation(MutationId),

    #[error("mutation {0} is queued and has not been applied")]
    MutationQueued(MutationId),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),
}

impl Error {
    /// Record ids carried by a mutation failure, empty for other variants.
    pub fn affected_ids(&self) -> &[RecordId] {
        match self {
            Error::Mutation { ids, .. } => ids,
            _ => &[],
        }
    }

    /// Whether the failure is a load/feed transport problem the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::FeedLost(_))
    }
}

fn display_id(id: &Option<RecordId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "<no id>".to_string(),
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::RecordNotFound(42);
        assert_eq!(err.to_string(), "record not found: 42");

        let err = Error::Mutation {
            ids: vec![1, 2],
            cause: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "mutation rejected for [1, 2]: permission denied"
        );

        let err = Error::MalformedRecord {
            id: None,
            reason: "missing required field: id".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed record <no id>: missing required field: id"
        );

        let err = Error::TypeMismatch {
            field: "favori".into(),
            expected: "Bool".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'favori': expected Bool, got String"
        );
    }

    #[test]
    fn affected_ids_only_for_mutations() {
        let err = Error::Mutation {
            ids: vec![7],
            cause: "boom".into(),
        };
        assert_eq!(err.affected_ids(), &[7]);
        assert!(Error::Transport("offline".into()).affected_ids().is_empty());
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Transport("offline".into()).is_retryable());
        assert!(Error::FeedLost("socket closed".into()).is_retryable());
        assert!(!Error::AlreadyInitialized.is_retryable());
    }
}
