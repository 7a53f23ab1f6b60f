//! Error types for record store operations.

use std::fmt;

use crate::identifiers::{ClientId, Id};
use crate::relationship::RelationshipKind;
use crate::state::RecordState;

/// The primary error type for all record store operations.
///
/// Adapter failures (`CreateFailed`, `FindFailed`) and stalled dependents
/// (`DependencyUnresolved`) are recorded on the affected record rather than
/// returned across the commit boundary; every other variant is returned from
/// the caller operation that violated a precondition.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The adapter rejected a create request.
    CreateFailed {
        model: &'static str,
        record: ClientId,
        reason: String,
    },
    /// The adapter rejected a find request.
    FindFailed {
        model: &'static str,
        id: Id,
        reason: String,
    },
    /// A captured record is blocked on a record that entered `error`.
    DependencyUnresolved { record: ClientId, blocker: ClientId },
    /// Records of one transaction depend on each other in a loop.
    DependencyCycle { records: Vec<ClientId> },
    /// The operation is not allowed in the record's current state.
    InvalidState {
        record: ClientId,
        state: RecordState,
        operation: &'static str,
    },
    /// Two different definitions were registered under one model name.
    InvalidModel { model: &'static str, message: String },
    /// The model declares no attribute with this name.
    UnknownAttribute { model: &'static str, name: String },
    /// The model declares no relationship with this name.
    UnknownRelationship { model: &'static str, name: String },
    /// The relationship exists but has a different kind.
    WrongRelationshipKind {
        model: &'static str,
        name: &'static str,
        expected: RelationshipKind,
        actual: RelationshipKind,
    },
    /// A record of the wrong model was attached to a relationship.
    ModelMismatch {
        relationship: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Attributes delivered by the adapter carry no `id`.
    MissingId { model: &'static str },
    /// A value could not be used as a record id.
    InvalidId { actual: &'static str },
    /// A value had a different type than requested.
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Another record of the same model already holds this id.
    DuplicateIdentity { model: &'static str, id: Id },
    /// No record with this identity is known to the store.
    UnknownRecord { model: &'static str, id: Id },
    /// A record or transaction from a different store was passed in.
    ForeignRecord,
    /// Configuration errors
    Config(String),
}

/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Was this error reported by the adapter (as opposed to a caller precondition)?
    pub fn is_adapter_failure(&self) -> bool {
        matches!(self, Error::CreateFailed { .. } | Error::FindFailed { .. })
    }

    /// Can re-invoking `commit()` recover from this error?
    ///
    /// Create failures are retried by a later commit; a stalled dependent
    /// recovers once its blocker does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CreateFailed { .. } | Error::DependencyUnresolved { .. }
        )
    }

    /// The record this error is about, if any.
    pub fn record(&self) -> Option<ClientId> {
        match self {
            Error::CreateFailed { record, .. }
            | Error::DependencyUnresolved { record, .. }
            | Error::InvalidState { record, .. } => Some(*record),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CreateFailed {
                model,
                record,
                reason,
            } => write!(f, "Create of {} {} failed: {}", model, record, reason),
            Error::FindFailed { model, id, reason } => {
                write!(f, "Find of {} with id {} failed: {}", model, id, reason)
            }
            Error::DependencyUnresolved { record, blocker } => write!(
                f,
                "{} cannot be committed: it depends on {}, which failed",
                record, blocker
            ),
            Error::DependencyCycle { records } => {
                let names: Vec<String> = records.iter().map(ToString::to_string).collect();
                write!(f, "Dependency cycle detected: {}", names.join(" -> "))
            }
            Error::InvalidState {
                record,
                state,
                operation,
            } => write!(f, "Cannot {} {} in state {}", operation, record, state),
            Error::InvalidModel { model, message } => {
                write!(f, "Invalid model '{}': {}", model, message)
            }
            Error::UnknownAttribute { model, name } => {
                write!(f, "Model '{}' has no attribute '{}'", model, name)
            }
            Error::UnknownRelationship { model, name } => {
                write!(f, "Model '{}' has no relationship '{}'", model, name)
            }
            Error::WrongRelationshipKind {
                model,
                name,
                expected,
                actual,
            } => write!(
                f,
                "Relationship '{}.{}' is {:?}, expected {:?}",
                model, name, actual, expected
            ),
            Error::ModelMismatch {
                relationship,
                expected,
                actual,
            } => write!(
                f,
                "Relationship '{}' holds '{}' records, got '{}'",
                relationship, expected, actual
            ),
            Error::MissingId { model } => {
                write!(f, "Attributes for '{}' carry no id", model)
            }
            Error::InvalidId { actual } => write!(f, "A {} value cannot be a record id", actual),
            Error::TypeMismatch { expected, actual } => {
                write!(f, "Type error: expected {}, found {}", expected, actual)
            }
            Error::DuplicateIdentity { model, id } => {
                write!(f, "A '{}' record with id {} already exists", model, id)
            }
            Error::UnknownRecord { model, id } => {
                write!(f, "No '{}' record with id {} is known", model, id)
            }
            Error::ForeignRecord => write!(f, "Handle belongs to a different store"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
