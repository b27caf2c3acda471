// Tree-walking interpreter for parsed expressions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::functions;
use crate::parser::{self, Expr, Op};
use crate::Limits;

pub const NON_FINITE_ERROR: &str =
    "Calculation resulted in invalid value (division by zero or overflow)";

/// Named constant attached to a custom formula (e.g. a discount rate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaConstant {
    pub key: String,
    #[serde(default)]
    pub label: String,
    pub value: f64,
}

impl FormulaConstant {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self { key: key.into(), label: String::new(), value }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// One line of the explanation shown next to a previewed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStep {
    pub label: String,
    pub value: f64,
    pub formatted: String,
}

/// Result of evaluating an expression. Failures never panic or propagate:
/// `error` is set and `value` is 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub value: f64,
    pub steps: Vec<EvaluationStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Evaluation {
    pub(crate) fn failed(steps: Vec<EvaluationStep>, error: impl Into<String>) -> Self {
        Self { value: 0.0, steps, error: Some(error.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Evaluate an AST against resolved variable values.
pub fn evaluate_ast(expr: &Expr, vars: &BTreeMap<String, f64>) -> Result<f64, String> {
    match expr {
        Expr::Number { value } => Ok(*value),
        Expr::Variable { name } => vars
            .get(name)
            .copied()
            .ok_or_else(|| format!("Unknown variable: {}", name)),
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate_ast(left, vars)?;
            let r = evaluate_ast(right, vars)?;
            Ok(match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
                Op::Div => l / r,
            })
        }
        Expr::FunctionCall { function, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate_ast(arg, vars))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(functions::apply(*function, &values))
        }
    }
}

/// Evaluate an expression string. Constants override context entries with
/// the same key.
pub fn evaluate(
    expression: &str,
    context: &BTreeMap<String, f64>,
    constants: &[FormulaConstant],
) -> Evaluation {
    evaluate_with_limits(expression, context, constants, &Limits::default())
}

pub fn evaluate_with_limits(
    expression: &str,
    context: &BTreeMap<String, f64>,
    constants: &[FormulaConstant],
    limits: &Limits,
) -> Evaluation {
    let mut steps = Vec::with_capacity(constants.len() + context.len() + 1);
    let mut vars = context.clone();

    for constant in constants {
        vars.insert(constant.key.clone(), constant.value);
        let label = if constant.label.is_empty() { constant.key.clone() } else { constant.label.clone() };
        steps.push(step(label, constant.value));
    }
    for (key, value) in context {
        steps.push(step(title_case(key), *value));
    }

    if expression.chars().count() > limits.max_length {
        return Evaluation::failed(
            steps,
            format!("Expression exceeds {} characters", limits.max_length),
        );
    }

    let ast = match parser::parse(expression, limits.max_depth) {
        Ok(ast) => ast,
        Err(e) => return Evaluation::failed(steps, format!("Invalid formula syntax: {}", e)),
    };

    match evaluate_ast(&ast, &vars) {
        Ok(value) if value.is_finite() => {
            steps.push(step("Result".to_string(), value));
            Evaluation { value, steps, error: None }
        }
        Ok(value) => {
            log::debug!("expression '{}' produced non-finite value {}", expression, value);
            Evaluation::failed(steps, NON_FINITE_ERROR)
        }
        Err(e) => Evaluation::failed(steps, e),
    }
}

fn step(label: String, value: f64) -> EvaluationStep {
    EvaluationStep { formatted: format_number(value), label, value }
}

/// Compact money-style rendering used in evaluation steps.
pub fn format_number(value: f64) -> String {
    if value.abs() >= 1_000_000.0 {
        format!("${:.2}M", value / 1_000_000.0)
    } else if value.abs() >= 1_000.0 {
        format!("${:.1}K", value / 1_000.0)
    } else if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// `costSavings` -> `Cost Savings`
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else if c.is_ascii_uppercase() {
            out.push(' ');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}
