use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::units::Unit;

/// The output of one formula evaluation.
///
/// There is no mutating API: a new value is produced for every evaluation,
/// and the snapshot holds exactly the inputs the formula read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedValue {
    value: f64,
    unit: Unit,
    formula_id: String,
    formula_version: String,
    inputs_snapshot: BTreeMap<String, f64>,
    computed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<EvaluationError>,
}

impl CalculatedValue {
    pub(crate) fn computed(
        value: f64,
        unit: Unit,
        formula_id: &str,
        formula_version: &str,
        inputs_snapshot: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            value,
            unit,
            formula_id: formula_id.to_string(),
            formula_version: formula_version.to_string(),
            inputs_snapshot,
            computed_at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn failed(
        unit: Unit,
        formula_id: &str,
        formula_version: &str,
        inputs_snapshot: BTreeMap<String, f64>,
        error: EvaluationError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::computed(0.0, unit, formula_id, formula_version, inputs_snapshot)
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn formula_id(&self) -> &str {
        &self.formula_id
    }

    pub fn formula_version(&self) -> &str {
        &self.formula_version
    }

    pub fn inputs_snapshot(&self) -> &BTreeMap<String, f64> {
        &self.inputs_snapshot
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn error(&self) -> Option<&EvaluationError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
