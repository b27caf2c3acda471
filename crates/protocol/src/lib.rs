//! CalcGraph API payloads.
//!
//! Every `CalcApi` method answers with an [`ApiResponse`] envelope:
//!
//! ```json
//! {"success": true, "data": {...}}
//! {"success": false, "error": {"code": "validation_error", "message": "...", "details": ["..."]}}
//! ```
//!
//! Field names are camelCase on the wire; error codes are snake_case.

use std::collections::BTreeMap;

use calcgraph_expr::FormulaConstant;
use serde::{Deserialize, Serialize};

/// Current payload version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Response envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(error: ApiError) -> Self {
        Self { success: false, data: None, error: Some(error) }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), None) if self.success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(ApiError::new(ErrorCode::Internal, "response carried neither data nor error")),
        }
    }
}

impl<T> From<Result<T, ApiError>> for ApiResponse<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: Vec::new() }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)?;
        for detail in &self.details {
            write!(f, "\n  - {}", detail)?;
        }
        Ok(())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// One assumption change, used by single and batch updates and by
/// recalculation overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionUpdate {
    pub id: String,
    pub value: f64,
}

impl AssumptionUpdate {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), value }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub expression: String,
    #[serde(default)]
    pub context: BTreeMap<String, f64>,
    #[serde(default)]
    pub constants: Vec<FormulaConstant>,
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResult {
    pub applied: usize,
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub engine_version: String,
    pub protocol_version: u32,
    pub formula_count: usize,
    pub assumption_count: usize,
    pub audit_entries: usize,
}
