use std::path::PathBuf;

use thiserror::Error;

use crate::{
    array::ArrayError, csv::error::CsvError, dtype::DataType, variable::VariableId,
};

/// Errors returned by datasets, variables and backends.
///
/// Validation errors (`InvalidArgument`, `TypeMismatch`, `OutOfRange`,
/// `ReadOnly`, `Disposed`, `NotFound`, `NotSupported`) are raised by the call
/// that caused them and leave no side effect. Commit errors describe the state
/// the dataset was left in: after `ConstraintsFailed`, `CommitCancelled` and
/// `PrecommitFailed` every variable is back at the committed stage with its
/// pending changes intact; after `CommitIo` the pending changes are intact as
/// well and the caller retries or rolls back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not supported on a read-only {0}")]
    ReadOnly(String),

    #[error("the dataset has been disposed")]
    Disposed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraints failed for {variable}: {reason}")]
    ConstraintsFailed { variable: VariableId, reason: String },

    #[error("commit of {variable} cancelled: {reason}")]
    CommitCancelled { variable: VariableId, reason: String },

    #[error("precommit failed: {source}")]
    PrecommitFailed {
        #[source]
        source: Box<Error>,
    },

    #[error("final commit of `{}` failed: {source}", path.display())]
    CommitIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("linked commit failed at dataset #{index} `{uri}` after {committed} members committed: {source}")]
    DistributedCommit {
        index: usize,
        uri: String,
        committed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("internal consistency violated: {0}")]
    InternalConsistency(String),

    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the dataset is still usable after this error without reopening it.
    ///
    /// Parse failures on load and internal consistency violations are the only
    /// errors that leave no usable dataset behind.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Csv(CsvError::Parse { .. }) | Error::InternalConsistency(_) | Error::Disposed
        )
    }

    /// Whether the error aborted a commit during precommit, leaving all pending
    /// changes in place at the committed stage.
    pub fn is_precommit_abort(&self) -> bool {
        matches!(
            self,
            Error::ConstraintsFailed { .. }
                | Error::CommitCancelled { .. }
                | Error::PrecommitFailed { .. }
        )
    }
}

impl From<ArrayError> for Error {
    fn from(value: ArrayError) -> Self {
        match value {
            ArrayError::DataTypeMismatch { expected, actual } => {
                Error::TypeMismatch { expected, actual }
            }
            err @ ArrayError::OutOfRange { .. } => Error::OutOfRange(err.to_string()),
            err => Error::InvalidArgument(err.to_string()),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(Error::OutOfRange("x".into()).is_recoverable());
        assert!(
            Error::ConstraintsFailed {
                variable: VariableId(1),
                reason: "r".into()
            }
            .is_recoverable()
        );
        assert!(!Error::Csv(CsvError::parse(3, "bad")).is_recoverable());
        assert!(!Error::InternalConsistency("x".into()).is_recoverable());
        assert!(!Error::Disposed.is_recoverable());
    }

    #[test]
    fn array_errors_map_to_validation_errors() {
        assert!(matches!(
            Error::from(ArrayError::ShapeOverflow),
            Error::InvalidArgument(_)
        ));
    }
}
