//! Append-only audit log.
//!
//! Every evaluation and every assumption change is recorded with a sequence
//! number and timestamp. Entries are never edited or removed; a restored
//! checkpoint continues the sequence where it left off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Initialize,
    EvaluateFormula,
    Aggregate,
    UpdateAssumption,
    ResetAssumption,
    ResetAllAssumptions,
    ImportAssumptions,
    RestoreCheckpoint,
    MonteCarlo,
}

impl AuditAction {
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::Initialize => "initialize",
            AuditAction::EvaluateFormula => "evaluate_formula",
            AuditAction::Aggregate => "aggregate",
            AuditAction::UpdateAssumption => "update_assumption",
            AuditAction::ResetAssumption => "reset_assumption",
            AuditAction::ResetAllAssumptions => "reset_all_assumptions",
            AuditAction::ImportAssumptions => "import_assumptions",
            AuditAction::RestoreCheckpoint => "restore_checkpoint",
            AuditAction::MonteCarlo => "monte_carlo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from exported entries. Rejects sequences that are not
    /// strictly increasing or timestamps that go backwards.
    pub fn restore(entries: Vec<AuditEntry>) -> Result<Self, EngineError> {
        for pair in entries.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(EngineError::InvalidCheckpoint(format!(
                    "audit sequence {} follows {}",
                    pair[1].sequence, pair[0].sequence
                )));
            }
            if pair[1].timestamp < pair[0].timestamp {
                return Err(EngineError::InvalidCheckpoint(format!(
                    "audit entry {} is older than its predecessor",
                    pair[1].sequence
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn record(&mut self, action: AuditAction, details: serde_json::Value) -> &AuditEntry {
        let now = Utc::now();
        let (sequence, timestamp) = match self.entries.last() {
            // Clock steps backwards are absorbed so order stays monotonic
            Some(last) => (last.sequence + 1, now.max(last.timestamp)),
            None => (0, now),
        };
        log::debug!("audit #{} {}", sequence, action.label());
        self.entries.push(AuditEntry { sequence, timestamp, action, details });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}
