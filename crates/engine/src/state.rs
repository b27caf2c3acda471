//! Checkpoint export and import.
//!
//! An exported [`EngineState`] carries every assumption, a summary of the
//! registered formulas, the full audit log and a fingerprint. The fingerprint
//! is `sha256:<hex>` over a canonical NDJSON rendering of `(id, value)` for
//! each assumption followed by `(id, version)` for each formula, so two
//! engines with the same values and formula versions always agree.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::assumptions::Assumption;
use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::engine::{CalcEngine, ENGINE_VERSION};
use crate::error::EngineError;
use crate::formulas::{FormulaCategory, FormulaDefinition, FormulaRegistry};
use crate::units::Unit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: FormulaCategory,
    pub derivation: String,
    pub required_variables: Vec<String>,
    pub output_unit: Unit,
}

impl From<&FormulaDefinition> for FormulaSummary {
    fn from(f: &FormulaDefinition) -> Self {
        Self {
            id: f.id.to_string(),
            name: f.name.to_string(),
            version: f.version.to_string(),
            category: f.category,
            derivation: f.derivation.to_string(),
            required_variables: f.required_variables.iter().map(|v| v.to_string()).collect(),
            output_unit: f.output_unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub engine_version: String,
    pub exported_at: DateTime<Utc>,
    pub assumptions: Vec<Assumption>,
    pub formulas: Vec<FormulaSummary>,
    pub audit_log: Vec<AuditEntry>,
    pub fingerprint: String,
}

impl EngineState {
    /// Recompute the fingerprint from this state's own contents.
    pub fn verify_fingerprint(&self) -> bool {
        let expected = compute_fingerprint(
            self.assumptions.iter().map(|a| (a.id.as_str(), a.current_value)),
            self.formulas.iter().map(|f| (f.id.as_str(), f.version.as_str())),
        );
        expected == self.fingerprint
    }
}

/// An assumption value to restore. Extra fields of a full exported
/// assumption are ignored, so an `EngineState` is itself a valid checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssumptionSnapshot {
    pub id: String,
    pub current_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInput {
    pub assumptions: Vec<AssumptionSnapshot>,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

pub fn compute_fingerprint<'a>(
    assumptions: impl Iterator<Item = (&'a str, f64)>,
    formulas: impl Iterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut hasher = Sha256::new();
    for (id, value) in assumptions {
        hasher.update(json!({ "a": id, "v": value }).to_string().as_bytes());
        hasher.update(b"\n");
    }
    for (id, version) in formulas {
        hasher.update(json!({ "f": id, "v": version }).to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{:x}", hasher.finalize())
}

impl CalcEngine {
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(
            self.assumptions.iter().map(|a| (a.id.as_str(), a.current_value)),
            self.formulas.iter().map(|f| (f.id, f.version)),
        )
    }

    pub fn export_state(&self) -> EngineState {
        EngineState {
            engine_version: ENGINE_VERSION.to_string(),
            exported_at: Utc::now(),
            assumptions: self.assumptions.iter().cloned().collect(),
            formulas: self.formulas.iter().map(FormulaSummary::from).collect(),
            audit_log: self.audit.entries().to_vec(),
            fingerprint: self.fingerprint(),
        }
    }

    /// Apply a set of assumption values. Every value is checked before any
    /// is applied; on failure nothing changes and all problems are returned.
    ///
    /// A value equal to the assumption's default clears its override flag.
    pub fn import_assumptions(&mut self, values: &[AssumptionSnapshot]) -> Result<(), Vec<EngineError>> {
        let errors: Vec<EngineError> = values
            .iter()
            .filter_map(|snapshot| match self.assumptions.get(&snapshot.id) {
                Some(a) => a.check(snapshot.current_value).err(),
                None => Some(EngineError::UnknownAssumption(snapshot.id.clone())),
            })
            .collect();
        if !errors.is_empty() {
            log::warn!("rejected import of {} assumption values ({} invalid)", values.len(), errors.len());
            return Err(errors);
        }

        let mut changed = Vec::new();
        for snapshot in values {
            let is_default = self
                .assumptions
                .get(&snapshot.id)
                .is_some_and(|a| a.default_value == snapshot.current_value);
            let result = if is_default {
                self.assumptions.reset(&snapshot.id)
            } else {
                self.assumptions.update(&snapshot.id, snapshot.current_value).map(|_| ())
            };
            result.map_err(|e| vec![e])?;
            changed.push(json!({ "id": snapshot.id, "value": snapshot.current_value }));
        }

        self.audit.record(AuditAction::ImportAssumptions, json!({ "values": changed }));
        Ok(())
    }

    /// Build a fresh engine from a checkpoint.
    ///
    /// The audit log is validated and continued, a `restore_checkpoint` entry
    /// is appended, and the assumption values are applied all-or-nothing. When
    /// the checkpoint carries a fingerprint it must match the restored engine.
    pub fn from_checkpoint(formulas: Arc<FormulaRegistry>, checkpoint: CheckpointInput) -> Result<Self, EngineError> {
        let restoring_log = !checkpoint.audit_log.is_empty();
        let mut engine = Self::with_formulas(formulas);
        if restoring_log {
            engine.audit = AuditLog::restore(checkpoint.audit_log)?;
        }

        engine.audit.record(
            AuditAction::RestoreCheckpoint,
            json!({
                "assumptions": checkpoint.assumptions.len(),
                "restoredAuditEntries": restoring_log,
            }),
        );

        engine.import_assumptions(&checkpoint.assumptions).map_err(|errors| {
            EngineError::InvalidCheckpoint(errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))
        })?;

        if let Some(expected) = checkpoint.fingerprint {
            let actual = engine.fingerprint();
            if actual != expected {
                return Err(EngineError::InvalidCheckpoint(format!(
                    "fingerprint mismatch: expected {}, restored {}",
                    expected, actual
                )));
            }
        }

        log::info!("restored checkpoint with {} audit entries", engine.audit.len());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::ids;

    fn snapshot(id: &str, value: f64) -> AssumptionSnapshot {
        AssumptionSnapshot { id: id.to_string(), current_value: value }
    }

    #[test]
    fn test_export_fingerprint_verifies() {
        let mut engine = CalcEngine::new();
        engine.update_assumption(ids::ADOPTION_RATE, 0.6).unwrap();
        let state = engine.export_state();
        assert!(state.fingerprint.starts_with("sha256:"));
        assert_eq!(state.fingerprint.len(), "sha256:".len() + 64);
        assert!(state.verify_fingerprint());
        assert_eq!(state.assumptions.len(), engine.assumptions().len());
        assert_eq!(state.formulas.len(), engine.formulas().len());

        let mut tampered = state.clone();
        tampered.assumptions[0].current_value += 1.0;
        assert!(!tampered.verify_fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_values() {
        let mut engine = CalcEngine::new();
        let before = engine.fingerprint();
        engine.update_assumption(ids::VALUE_WEIGHT, 50.0).unwrap();
        assert_ne!(engine.fingerprint(), before);
        engine.reset_assumption(ids::VALUE_WEIGHT).unwrap();
        assert_eq!(engine.fingerprint(), before);
    }

    #[test]
    fn test_import_is_all_or_nothing() {
        let mut engine = CalcEngine::new();
        let errors = engine
            .import_assumptions(&[
                snapshot(ids::ADOPTION_RATE, 0.6),
                snapshot(ids::VALUE_WEIGHT, 500.0),
                snapshot("nope", 1.0),
            ])
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(engine.assumption_value(ids::ADOPTION_RATE).unwrap(), 0.85);
        assert_eq!(engine.audit.count(AuditAction::ImportAssumptions), 0);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut engine = CalcEngine::new();
        engine.update_assumption(ids::ADOPTION_RATE, 0.6).unwrap();
        engine.update_assumption(ids::CLAUDE_INPUT_PRICE, 5.0).unwrap();
        let state = engine.export_state();

        let json = serde_json::to_string(&state).unwrap();
        let checkpoint: CheckpointInput = serde_json::from_str(&json).unwrap();
        let restored = CalcEngine::from_checkpoint(Arc::clone(&engine.formulas), checkpoint).unwrap();

        assert_eq!(restored.fingerprint(), state.fingerprint);
        assert_eq!(restored.assumption_value(ids::ADOPTION_RATE).unwrap(), 0.6);
        assert!(restored.assumption(ids::ADOPTION_RATE).unwrap().is_user_override);
        assert!(!restored.assumption(ids::VALUE_WEIGHT).unwrap().is_user_override);

        // audit continues after the exported entries
        let log = restored.audit_log();
        assert_eq!(&log[..state.audit_log.len()], &state.audit_log[..]);
        assert_eq!(log[state.audit_log.len()].action, AuditAction::RestoreCheckpoint);
        assert_eq!(log.last().map(|e| e.action), Some(AuditAction::ImportAssumptions));
    }

    #[test]
    fn test_checkpoint_without_audit_log() {
        let checkpoint = CheckpointInput {
            assumptions: vec![snapshot(ids::TTV_WEIGHT, 20.0)],
            ..Default::default()
        };
        let engine = CalcEngine::from_checkpoint(Arc::new(FormulaRegistry::standard()), checkpoint).unwrap();
        assert_eq!(engine.assumption_value(ids::TTV_WEIGHT).unwrap(), 20.0);
        let actions: Vec<_> = engine.audit_log().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Initialize, AuditAction::RestoreCheckpoint, AuditAction::ImportAssumptions]
        );
    }

    #[test]
    fn test_checkpoint_fingerprint_mismatch() {
        let checkpoint = CheckpointInput {
            assumptions: vec![snapshot(ids::TTV_WEIGHT, 20.0)],
            fingerprint: Some("sha256:00".to_string()),
            ..Default::default()
        };
        let err = CalcEngine::from_checkpoint(Arc::new(FormulaRegistry::standard()), checkpoint).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCheckpoint(msg) if msg.contains("fingerprint")));
    }

    #[test]
    fn test_checkpoint_out_of_range_rejected() {
        let checkpoint = CheckpointInput {
            assumptions: vec![snapshot(ids::ADOPTION_RATE, 7.0)],
            ..Default::default()
        };
        let err = CalcEngine::from_checkpoint(Arc::new(FormulaRegistry::standard()), checkpoint).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCheckpoint(msg) if msg.contains(ids::ADOPTION_RATE)));
    }
}
