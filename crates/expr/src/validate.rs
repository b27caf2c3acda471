// Static validation of custom formula expressions

use serde::Serialize;

use crate::parser::{self, Function};
use crate::Limits;

/// Identifiers that name host-language objects or keywords. The parser can
/// never execute them, but an expression that mentions one is rejected
/// outright so authors get a clear message.
const RESERVED_IDENTIFIERS: &[&str] = &[
    "eval",
    "function",
    "new",
    "return",
    "import",
    "require",
    "process",
    "global",
    "window",
    "document",
    "console",
    "constructor",
    "prototype",
    "__proto__",
    "this",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("Expression is empty")]
    Empty,
    #[error("Expression is {length} characters; the limit is {max}")]
    TooLong { length: usize, max: usize },
    #[error("Unsafe pattern in expression: {pattern}")]
    UnsafePattern { pattern: String },
    #[error("Unknown variable: {name}")]
    MissingVariable { name: String },
    #[error("Mismatched parentheses")]
    UnbalancedParentheses,
    #[error("Expression nesting exceeds {max} levels")]
    TooDeep { max: usize },
    #[error("Syntax error: {message}")]
    Syntax { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub missing_variables: Vec<String>,
    pub used_variables: Vec<String>,
}

impl Validation {
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }

    pub fn has_unsafe_pattern(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::UnsafePattern { .. }))
    }

    fn finish(issues: Vec<ValidationIssue>, missing: Vec<String>, used: Vec<String>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
            missing_variables: missing,
            used_variables: used,
        }
    }
}

pub fn validate<S: AsRef<str>>(expression: &str, available: &[S]) -> Validation {
    validate_with_limits(expression, available, &Limits::default())
}

pub fn validate_with_limits<S: AsRef<str>>(
    expression: &str,
    available: &[S],
    limits: &Limits,
) -> Validation {
    let used = used_variables(expression);

    if expression.trim().is_empty() {
        return Validation::finish(vec![ValidationIssue::Empty], Vec::new(), used);
    }

    let length = expression.chars().count();
    if length > limits.max_length {
        let issue = ValidationIssue::TooLong { length, max: limits.max_length };
        return Validation::finish(vec![issue], Vec::new(), used);
    }

    if let Some(pattern) = find_unsafe_pattern(expression) {
        log::warn!("rejected expression with unsafe pattern '{}'", pattern);
        let issue = ValidationIssue::UnsafePattern { pattern };
        return Validation::finish(vec![issue], Vec::new(), used);
    }

    let mut issues = Vec::new();

    let missing: Vec<String> = used
        .iter()
        .filter(|v| !available.iter().any(|a| a.as_ref() == v.as_str()))
        .cloned()
        .collect();
    for name in &missing {
        issues.push(ValidationIssue::MissingVariable { name: name.clone() });
    }

    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    let mut balanced = true;
    for c in expression.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            balanced = false;
            break;
        }
        max_depth = max_depth.max(depth);
    }
    if depth != 0 {
        balanced = false;
    }

    if !balanced {
        issues.push(ValidationIssue::UnbalancedParentheses);
    } else if max_depth as usize > limits.max_depth {
        issues.push(ValidationIssue::TooDeep { max: limits.max_depth });
    } else if let Err(message) = parser::parse(expression, limits.max_depth) {
        issues.push(ValidationIssue::Syntax { message });
    }

    Validation::finish(issues, missing, used)
}

/// Identifier runs that are not whitelisted function names, deduplicated in
/// order of first appearance. A run that starts with a digit ("1e5") is not
/// an identifier.
pub fn used_variables(expression: &str) -> Vec<String> {
    let mut used: Vec<String> = Vec::new();
    for word in word_runs(expression) {
        let starts_ident = word.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
        if starts_ident && Function::from_name(word).is_none() && !used.iter().any(|u| u == word) {
            used.push(word.to_string());
        }
    }
    used
}

fn word_runs(expression: &str) -> impl Iterator<Item = &str> {
    expression
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn find_unsafe_pattern(expression: &str) -> Option<String> {
    if let Some(c) = expression.chars().find(|c| !is_allowed_char(*c)) {
        return Some(format!("character '{}'", c));
    }
    word_runs(expression)
        .find(|w| RESERVED_IDENTIFIERS.iter().any(|r| r.eq_ignore_ascii_case(w)))
        .map(|w| format!("reserved identifier '{}'", w))
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || c.is_whitespace()
        || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ',' | '%')
}
