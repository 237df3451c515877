//! Error types for hyperresolution CHC solving

use thiserror::Error;

/// Errors raised while building or solving a CHC problem
#[derive(Debug, Error)]
pub enum HyresError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("undefined relation: {0}")]
    UndefinedRelation(String),

    #[error("arity mismatch for relation {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A clause that is not a unit clause was used where one is required.
    /// This always points at a bug in normalization.
    #[error("clause {clause} is not a unit clause: {reason}")]
    NotUnitClause { clause: usize, reason: String },

    /// The search strategy handed back something the engine cannot resolve.
    #[error("search strategy contract violated: {0}")]
    StrategyContract(String),

    #[error("solve cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for hyperresolution operations
pub type HyresResult<T> = Result<T, HyresError>;
