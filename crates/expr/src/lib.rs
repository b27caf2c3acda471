//! Sandboxed arithmetic for user-authored report formulas.
//!
//! Expressions are tokenized, parsed by recursive descent into an explicit
//! AST and walked by an interpreter. Nothing in this crate hands text to a
//! host evaluator, so the only things an expression can do are the four
//! arithmetic operators and the whitelisted math functions.

pub mod catalog;
pub mod eval;
mod functions;
pub mod parser;
pub mod validate;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use catalog::{inputs_by_category, InputField, AVAILABLE_INPUTS};
pub use eval::{evaluate, evaluate_with_limits, Evaluation, EvaluationStep, FormulaConstant};
pub use parser::{parse, Expr, Function, Op};
pub use validate::{validate, validate_with_limits, Validation, ValidationIssue};

/// Resource bounds applied before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_length: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_length: 2_000, max_depth: 32 }
    }
}

/// Validate against the supplied context and constants, then evaluate.
/// Invalid expressions are never evaluated; their messages are joined into
/// `error`.
pub fn preview(
    expression: &str,
    context: &BTreeMap<String, f64>,
    constants: &[FormulaConstant],
    limits: &Limits,
) -> Evaluation {
    let available: Vec<&str> = context
        .keys()
        .map(String::as_str)
        .chain(constants.iter().map(|c| c.key.as_str()))
        .collect();

    let validation = validate_with_limits(expression, &available, limits);
    if !validation.is_valid {
        return Evaluation {
            value: 0.0,
            steps: Vec::new(),
            error: Some(validation.messages().join("; ")),
        };
    }

    evaluate_with_limits(expression, context, constants, limits)
}
