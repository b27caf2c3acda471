use serde::{Deserialize, Serialize};

use crate::units::Unit;

/// Coarse classification used by callers to pick an error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown formula: {0}")]
    UnknownFormula(String),

    #[error("unknown assumption: {0}")]
    UnknownAssumption(String),

    #[error("formula {id} version {version} is already registered")]
    DuplicateFormula { id: String, version: String },

    #[error("{id}: value {value} is below minimum {min}")]
    BelowMinimum { id: String, value: f64, min: f64 },

    #[error("{id}: value {value} is above maximum {max}")]
    AboveMaximum { id: String, value: f64, max: f64 },

    #[error("{id}: value is not a finite number")]
    NotFinite { id: String },

    #[error("dimension mismatch: {left} ({left_dimension}) cannot combine with {right} ({right_dimension})")]
    DimensionMismatch {
        left: Unit,
        left_dimension: String,
        right: Unit,
        right_dimension: String,
    },

    #[error("uncertain variable {id}: {reason}")]
    InvalidVariable { id: String, reason: String },

    #[error("sample size must be at least 1")]
    EmptySample,

    #[error("all {0} samples produced non-finite values")]
    NoValidSamples(usize),

    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownFormula(_) | EngineError::UnknownAssumption(_) => ErrorKind::NotFound,
            EngineError::DuplicateFormula { .. } => ErrorKind::Conflict,
            EngineError::BelowMinimum { .. }
            | EngineError::AboveMaximum { .. }
            | EngineError::NotFinite { .. }
            | EngineError::DimensionMismatch { .. }
            | EngineError::InvalidVariable { .. }
            | EngineError::EmptySample => ErrorKind::Validation,
            // A checkpoint that fails to restore is treated as corrupt
            EngineError::NoValidSamples(_) | EngineError::InvalidCheckpoint(_) => ErrorKind::Internal,
        }
    }
}

/// Recoverable failure attached to a `CalculatedValue` instead of being
/// returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("missing variables: {}", names.join(", "))]
    MissingVariables { names: Vec<String> },

    #[error("result is not finite (division by zero or overflow)")]
    NonFinite,

    #[error("input {name} carries an evaluation error")]
    InvalidInput { name: String },
}
