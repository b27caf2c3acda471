//! Dimensional calculation engine.
//!
//! Formulas are registered once and shared; assumptions and the audit log
//! belong to one [`CalcEngine`] session. Every result is a
//! [`CalculatedValue`] carrying its unit, formula version and inputs.

pub mod assumptions;
pub mod audit;
pub mod calculations;
pub mod engine;
pub mod error;
pub mod formulas;
pub mod monte_carlo;
pub mod state;
pub mod units;
pub mod value;

pub use assumptions::{Assumption, AssumptionCategory, AssumptionRegistry, SourceReference};
pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use calculations::{DriverBenefits, PriorityInputs, PriorityScores, RawBenefits, TokenCosts, TokenUsage};
pub use engine::{CalcEngine, AGGREGATION_FORMULA_ID, ENGINE_VERSION};
pub use error::{EngineError, ErrorKind, EvaluationError};
pub use formulas::{Context, FormulaCategory, FormulaDefinition, FormulaRegistry, FORMULA_VERSION};
pub use monte_carlo::{ConfidenceLevel, Distribution, MonteCarloResult, UncertainVariable};
pub use state::{AssumptionSnapshot, CheckpointInput, EngineState, FormulaSummary};
pub use units::{Dimension, Unit};
pub use value::CalculatedValue;
