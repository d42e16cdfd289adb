//! Error types for control evaluation and configuration.

use core::fmt;

use sf_core::SfError;
use thiserror::Error;

use crate::parser::ParseError;

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Which namespace an id lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Sensor,
    Fan,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Sensor => f.write_str("sensor"),
            RefKind::Fan => f.write_str("fan"),
        }
    }
}

/// Errors that can occur while building or evaluating control expressions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a control function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// An expression references an id that was never declared.
    #[error("Unknown {kind} reference '{id}'")]
    UnknownReference { kind: RefKind, id: String },

    /// A store write or read used an undeclared id.
    #[error("Unknown {kind} id '{id}'")]
    UnknownId { kind: RefKind, id: String },

    /// A referenced value has not been recorded yet.
    #[error("No value recorded for {kind} '{id}' yet")]
    MissingValue { kind: RefKind, id: String },

    /// The same id was declared twice.
    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: RefKind, id: String },

    /// Fans reference each other's duty in a loop.
    #[error("Cyclic fan dependency between: {}", fans.join(", "))]
    CyclicDependency { fans: Vec<String> },

    /// Algorithm parameters could not be bound or are out of range.
    #[error("{algorithm}: {what}")]
    Algorithm { algorithm: String, what: String },

    /// Expression text could not be parsed.
    #[error("Invalid expression: {0}")]
    Parse(#[from] ParseError),

    /// Value model violation (duty range, non-finite numbers).
    #[error(transparent)]
    Value(#[from] SfError),
}

impl ControlError {
    pub(crate) fn algorithm(algorithm: &str, what: impl Into<String>) -> Self {
        ControlError::Algorithm {
            algorithm: algorithm.to_string(),
            what: what.into(),
        }
    }
}
