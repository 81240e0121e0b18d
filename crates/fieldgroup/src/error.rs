#![forbid(unsafe_code)]

//! Error taxonomy for cells, bindings and group commits.

use thiserror::Error;

use crate::field::FieldId;
use crate::value::TypeTag;

/// A write to a single cell was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CellError {
    #[error("cell is read-only ({type_tag})")]
    ReadOnlyViolation { type_tag: TypeTag },

    #[error("type mismatch: cell holds {expected}, got {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },

    #[error("field has no value source")]
    NoValueSource,
}

/// A bind, unbind or record rebind was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("slot {slot:?} is already bound to field {bound_to}")]
    DuplicateBinding { slot: String, bound_to: FieldId },

    #[error("slot {slot:?} not found on record")]
    SlotNotFound { slot: String },

    #[error("no record bound; slot {slot:?} will resolve when a record is set")]
    NoRecordBound { slot: String },

    #[error("field {field} is not bound")]
    NotBound { field: FieldId },
}

/// Raised by a [`CommitHandler`](crate::group::CommitHandler) to veto a commit.
#[derive(Debug, Error)]
#[error("commit aborted: {reason}")]
pub struct CommitAborted {
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CommitAborted {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Human-readable reason supplied by the handler.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Local validation failure reported by a field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct InvalidValue {
    pub reason: String,
}

impl InvalidValue {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed [`BindingGroup::commit`](crate::group::BindingGroup::commit).
#[derive(Debug, Error)]
pub enum CommitError {
    /// Pre-flight validation failed; no cell was touched.
    #[error("field bound to {slot:?} is invalid: {reason}")]
    InvalidValue { slot: String, reason: String },

    /// A handler vetoed before the cells were committed; every cell was
    /// rolled back. `rollback_failure` holds the first cell that could not
    /// be restored, in which case the record is not fully unchanged.
    #[error("pre-commit {aborted}")]
    PreCommit {
        #[source]
        aborted: CommitAborted,
        rollback_failure: Option<CellError>,
    },

    /// A handler failed after the cells were committed; the data change stands.
    #[error("post-commit {0}")]
    PostCommit(#[source] CommitAborted),

    /// `commit` or `discard` was re-entered from a handler or listener.
    #[error("a commit or discard is already in progress")]
    InProgress,

    /// A discard could not restore every cell; the rest were still rolled back.
    #[error("rollback failed: {0}")]
    Rollback(#[source] CellError),
}

impl CommitError {
    /// Whether the record already holds the committed values.
    ///
    /// Only a post-commit failure leaves data changed; callers own any
    /// compensating action.
    #[must_use]
    pub fn is_data_committed(&self) -> bool {
        matches!(self, Self::PostCommit(_))
    }

    /// The handler-supplied abort, if this error came from a handler.
    #[must_use]
    pub fn aborted(&self) -> Option<&CommitAborted> {
        match self {
            Self::PreCommit { aborted, .. } | Self::PostCommit(aborted) => Some(aborted),
            _ => None,
        }
    }

    /// The first cell error hit while undoing edits, if any.
    #[must_use]
    pub fn rollback_failure(&self) -> Option<&CellError> {
        match self {
            Self::PreCommit {
                rollback_failure, ..
            } => rollback_failure.as_ref(),
            Self::Rollback(err) => Some(err),
            _ => None,
        }
    }
}
