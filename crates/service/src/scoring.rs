// Opportunity scoring helpers that sit outside the formula registry

use serde::{Deserialize, Serialize};

use crate::research::Effort;

/// Effort on a 0-100 scale, higher meaning more work.
///
/// Data readiness is inverted (5 = ready = little effort); integration
/// complexity and change management count as-is.
pub fn effort_score(effort: &Effort) -> f64 {
    let readiness = 6.0 - f64::from(effort.data_readiness);
    let mean = (readiness + f64::from(effort.integration_complexity) + f64::from(effort.change_management)) / 3.0;
    mean * 20.0
}

/// Time-to-value is scored in whole months, rounded up.
pub fn ttv_months(months: f64) -> f64 {
    months.ceil()
}

/// Data maturity factor for a 1-5 maturity level.
pub fn maturity_factor(level: u8) -> f64 {
    match level {
        0 | 1 => 0.50,
        2 => 0.65,
        3 => 0.75,
        4 => 0.85,
        _ => 0.95,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityTier {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl PriorityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            PriorityTier::Critical
        } else if score >= 60.0 {
            PriorityTier::High
        } else if score >= 40.0 {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }

    /// Recommended implementation phase.
    pub fn phase(&self) -> Phase {
        match self {
            PriorityTier::Critical => Phase::Q1,
            PriorityTier::High => Phase::Q2,
            PriorityTier::Medium => Phase::Q3,
            PriorityTier::Low => Phase::Q4,
        }
    }
}
