//! Error types shared by every module of the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring a sweep or driving its runs.
#[derive(Debug, Error)]
pub enum SweepError {
    /// A stage key that was never added.
    #[error("stage key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but holds no candidate equal to the one given.
    #[error("operation not found among candidates: {0}")]
    OperationNotFound(String),

    /// A call that is not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A combination parameter without any candidate value.
    #[error("parameter has no candidate values: {0}")]
    EmptyParameter(String),

    #[error("cannot create working directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executor failed on one step of a run.
    #[error("step {index} ({operation}) failed: {message}")]
    Execution {
        index: usize,
        operation: String,
        message: String,
    },

    /// A persisted document lists the same stage key twice.
    #[error("duplicate stage key in document: {0}")]
    DuplicateKey(String),

    /// An operation listed under a section of another stage category.
    #[error("operation {operation} does not belong in section {section}")]
    MisplacedOperation { operation: String, section: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SweepResult<T> = Result<T, SweepError>;
