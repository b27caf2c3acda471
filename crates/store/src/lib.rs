//! SQLite storage for user-authored report formulas.
//!
//! Every save creates a new version row. Versions are grouped by
//! `(reportId, useCaseId, fieldKey)` and exactly one version per group is
//! active once any exists.

pub mod error;
pub mod formulas;

pub use error::{Result, StoreError};
pub use formulas::{CustomFormula, FormulaKey, FormulaStore, NewCustomFormula};
