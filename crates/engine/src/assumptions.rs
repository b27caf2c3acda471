//! Assumption registry
//!
//! Assumptions are named, bounded scalars that feed the formulas (token
//! prices, labor rates, conservative factors, scoring weights). The set is
//! fixed at construction; values change only through bounds-checked updates
//! and resets.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::formulas::{vars, Context};
use crate::units::Unit;

/// Assumption ids read by the engine and service.
pub mod ids {
    pub const CLAUDE_INPUT_PRICE: &str = "claude_input_price";
    pub const CLAUDE_OUTPUT_PRICE: &str = "claude_output_price";
    pub const ANALYST_HOURLY_RATE: &str = "analyst_hourly_rate";
    pub const ENGINEER_HOURLY_RATE: &str = "engineer_hourly_rate";
    pub const CSM_HOURLY_RATE: &str = "csm_hourly_rate";
    pub const REVENUE_CONSERVATIVE_FACTOR: &str = "revenue_conservative_factor";
    pub const COST_CONSERVATIVE_FACTOR: &str = "cost_conservative_factor";
    pub const CASHFLOW_CONSERVATIVE_FACTOR: &str = "cashflow_conservative_factor";
    pub const RISK_CONSERVATIVE_FACTOR: &str = "risk_conservative_factor";
    pub const DATA_MATURITY_FACTOR: &str = "data_maturity_factor";
    pub const ADOPTION_RATE: &str = "adoption_rate";
    pub const ADOPTION_FRICTION: &str = "adoption_friction";
    pub const IMPLEMENTATION_COST_RATIO: &str = "implementation_cost_ratio";
    pub const VALUE_WEIGHT: &str = "value_weight";
    pub const TTV_WEIGHT: &str = "ttv_weight";
    pub const EFFORT_WEIGHT: &str = "effort_weight";
}

/// The formula variable an assumption feeds. Labor rates have none: the
/// three roles share `hourlyRate` and callers pick one per use case.
pub fn formula_variable(id: &str) -> Option<&'static str> {
    let variable = match id {
        ids::CLAUDE_INPUT_PRICE => vars::INPUT_PRICE,
        ids::CLAUDE_OUTPUT_PRICE => vars::OUTPUT_PRICE,
        ids::REVENUE_CONSERVATIVE_FACTOR => vars::REVENUE_FACTOR,
        ids::COST_CONSERVATIVE_FACTOR => vars::COST_FACTOR,
        ids::CASHFLOW_CONSERVATIVE_FACTOR => vars::CASH_FLOW_FACTOR,
        ids::RISK_CONSERVATIVE_FACTOR => vars::RISK_FACTOR,
        ids::DATA_MATURITY_FACTOR => vars::DATA_MATURITY_FACTOR,
        ids::ADOPTION_RATE => vars::ADOPTION_RATE,
        ids::VALUE_WEIGHT => vars::VALUE_WEIGHT,
        ids::TTV_WEIGHT => vars::TTV_WEIGHT,
        ids::EFFORT_WEIGHT => vars::EFFORT_WEIGHT,
        _ => return None,
    };
    Some(variable)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssumptionCategory {
    AiPricing,
    LaborRates,
    ConservativeFactors,
    Adoption,
    Financial,
    ScoringWeights,
}

impl AssumptionCategory {
    /// Presentation order.
    pub const ALL: [AssumptionCategory; 6] = [
        AssumptionCategory::AiPricing,
        AssumptionCategory::LaborRates,
        AssumptionCategory::ConservativeFactors,
        AssumptionCategory::Adoption,
        AssumptionCategory::Financial,
        AssumptionCategory::ScoringWeights,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AssumptionCategory::AiPricing => "AI Pricing",
            AssumptionCategory::LaborRates => "Labor Rates",
            AssumptionCategory::ConservativeFactors => "Conservative Factors",
            AssumptionCategory::Adoption => "Adoption",
            AssumptionCategory::Financial => "Financial",
            AssumptionCategory::ScoringWeights => "Scoring Weights",
        }
    }
}

/// Citation backing an assumption's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
}

impl SourceReference {
    fn new(id: &str, name: &str, url: Option<&str>, year: u16) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.map(str::to_string),
            year: Some(year),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumption {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: AssumptionCategory,
    pub unit: Unit,
    pub default_value: f64,
    pub current_value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub is_user_override: bool,
    pub sources: Vec<SourceReference>,
}

impl Assumption {
    fn seed(
        id: &str,
        label: &str,
        category: AssumptionCategory,
        unit: Unit,
        default_value: f64,
        (min, max, step): (f64, f64, f64),
    ) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: String::new(),
            category,
            unit,
            default_value,
            current_value: default_value,
            min,
            max,
            step,
            is_user_override: false,
            sources: Vec::new(),
        }
    }

    fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    fn with_source(mut self, source: SourceReference) -> Self {
        self.sources.push(source);
        self
    }

    /// Bounds check without mutating.
    pub fn check(&self, value: f64) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::NotFinite { id: self.id.clone() });
        }
        if value < self.min {
            return Err(EngineError::BelowMinimum { id: self.id.clone(), value, min: self.min });
        }
        if value > self.max {
            return Err(EngineError::AboveMaximum { id: self.id.clone(), value, max: self.max });
        }
        Ok(())
    }
}

fn default_assumptions() -> Vec<Assumption> {
    use AssumptionCategory::*;

    let anthropic = || SourceReference::new("anthropic_pricing", "Anthropic API Pricing", Some("https://www.anthropic.com/pricing"), 2025);
    let glassdoor = || SourceReference::new("glassdoor_burden", "Glassdoor salary data with 1.3x benefits burden", None, 2024);
    let bcg = || SourceReference::new("bcg_methodology", "BCG value realization methodology", None, 2024);
    let mckinsey = || SourceReference::new("mckinsey_ai_report", "McKinsey State of AI", None, 2024);
    let change = || SourceReference::new("bcg_change_mgmt", "BCG change management research", None, 2024);
    let internal = || SourceReference::new("internal", "Internal scoring framework", None, 2025);

    vec![
        Assumption::seed(ids::CLAUDE_INPUT_PRICE, "Claude Input Token Price", AiPricing, Unit::UsdPerMillionTokens, 3.0, (0.01, 100.0, 0.01))
            .with_description("Price per million input tokens")
            .with_source(anthropic()),
        Assumption::seed(ids::CLAUDE_OUTPUT_PRICE, "Claude Output Token Price", AiPricing, Unit::UsdPerMillionTokens, 15.0, (0.01, 100.0, 0.01))
            .with_description("Price per million output tokens")
            .with_source(anthropic()),
        Assumption::seed(ids::ANALYST_HOURLY_RATE, "Analyst Hourly Rate", LaborRates, Unit::UsdPerHour, 85.0, (25.0, 500.0, 5.0))
            .with_description("Fully burdened hourly cost of an analyst")
            .with_source(glassdoor()),
        Assumption::seed(ids::ENGINEER_HOURLY_RATE, "Engineer Hourly Rate", LaborRates, Unit::UsdPerHour, 125.0, (50.0, 750.0, 5.0))
            .with_description("Fully burdened hourly cost of an engineer")
            .with_source(glassdoor()),
        Assumption::seed(ids::CSM_HOURLY_RATE, "Customer Success Hourly Rate", LaborRates, Unit::UsdPerHour, 95.0, (30.0, 500.0, 5.0))
            .with_description("Fully burdened hourly cost of a customer success manager")
            .with_source(glassdoor()),
        Assumption::seed(ids::REVENUE_CONSERVATIVE_FACTOR, "Revenue Conservative Factor", ConservativeFactors, Unit::Ratio, 0.95, (0.5, 1.0, 0.01))
            .with_description("Discount applied to raw revenue benefit estimates")
            .with_source(bcg()),
        Assumption::seed(ids::COST_CONSERVATIVE_FACTOR, "Cost Conservative Factor", ConservativeFactors, Unit::Ratio, 0.90, (0.5, 1.0, 0.01))
            .with_description("Discount applied to raw cost benefit estimates")
            .with_source(bcg()),
        Assumption::seed(ids::CASHFLOW_CONSERVATIVE_FACTOR, "Cash Flow Conservative Factor", ConservativeFactors, Unit::Ratio, 0.85, (0.5, 1.0, 0.01))
            .with_description("Discount applied to raw cash flow benefit estimates")
            .with_source(bcg()),
        Assumption::seed(ids::RISK_CONSERVATIVE_FACTOR, "Risk Conservative Factor", ConservativeFactors, Unit::Ratio, 0.80, (0.5, 1.0, 0.01))
            .with_description("Discount applied to raw risk reduction estimates")
            .with_source(bcg()),
        Assumption::seed(ids::DATA_MATURITY_FACTOR, "Data Maturity Factor", ConservativeFactors, Unit::Ratio, 0.75, (0.25, 1.0, 0.05))
            .with_description("Scales benefits by the organization's data and process readiness")
            .with_source(mckinsey()),
        Assumption::seed(ids::ADOPTION_RATE, "Adoption Rate", Adoption, Unit::Ratio, 0.85, (0.3, 1.0, 0.05))
            .with_description("Share of target users expected to adopt the workflow")
            .with_source(change()),
        Assumption::seed(ids::ADOPTION_FRICTION, "Adoption Friction", Adoption, Unit::Ratio, 0.90, (0.5, 1.0, 0.05))
            .with_description("Productivity retained during the transition period")
            .with_source(change()),
        Assumption::seed(ids::IMPLEMENTATION_COST_RATIO, "Implementation Cost Ratio", Financial, Unit::Ratio, 0.20, (0.05, 1.0, 0.01))
            .with_description("One-time implementation cost as a share of first-year value")
            .with_source(internal()),
        Assumption::seed(ids::VALUE_WEIGHT, "Value Weight", ScoringWeights, Unit::Percent, 40.0, (0.0, 100.0, 5.0))
            .with_description("Weight of the value score in priority")
            .with_source(internal()),
        Assumption::seed(ids::TTV_WEIGHT, "Time-to-Value Weight", ScoringWeights, Unit::Percent, 30.0, (0.0, 100.0, 5.0))
            .with_description("Weight of the time-to-value score in priority")
            .with_source(internal()),
        Assumption::seed(ids::EFFORT_WEIGHT, "Effort Weight", ScoringWeights, Unit::Percent, 30.0, (0.0, 100.0, 5.0))
            .with_description("Weight of the inverted effort score in priority")
            .with_source(internal()),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssumptionRegistry {
    assumptions: Vec<Assumption>,
}

impl Default for AssumptionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AssumptionRegistry {
    pub fn with_defaults() -> Self {
        Self { assumptions: default_assumptions() }
    }

    pub fn get(&self, id: &str) -> Option<&Assumption> {
        self.assumptions.iter().find(|a| a.id == id)
    }

    pub fn value(&self, id: &str) -> Result<f64, EngineError> {
        self.get(id)
            .map(|a| a.current_value)
            .ok_or_else(|| EngineError::UnknownAssumption(id.to_string()))
    }

    /// Set a value, returning the previous one. Out-of-range values are
    /// rejected and leave the assumption untouched.
    pub fn update(&mut self, id: &str, value: f64) -> Result<f64, EngineError> {
        let assumption = self.get_mut(id)?;
        assumption.check(value)?;
        let previous = assumption.current_value;
        assumption.current_value = value;
        assumption.is_user_override = true;
        Ok(previous)
    }

    pub fn reset(&mut self, id: &str) -> Result<(), EngineError> {
        let assumption = self.get_mut(id)?;
        assumption.current_value = assumption.default_value;
        assumption.is_user_override = false;
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for assumption in &mut self.assumptions {
            assumption.current_value = assumption.default_value;
            assumption.is_user_override = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assumption> {
        self.assumptions.iter()
    }

    pub fn len(&self) -> usize {
        self.assumptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assumptions.is_empty()
    }

    /// Non-empty categories in presentation order.
    pub fn by_category(&self) -> Vec<(AssumptionCategory, Vec<&Assumption>)> {
        AssumptionCategory::ALL
            .iter()
            .map(|cat| (*cat, self.assumptions.iter().filter(|a| a.category == *cat).collect::<Vec<_>>()))
            .filter(|(_, members)| !members.is_empty())
            .collect()
    }

    /// Current values keyed by assumption id.
    pub fn values(&self) -> Context {
        self.assumptions
            .iter()
            .map(|a| (a.id.clone(), a.current_value))
            .collect()
    }

    /// Current values as a formula context: keyed by assumption id and,
    /// where one exists, by the formula variable the assumption feeds.
    pub fn formula_context(&self) -> Context {
        let mut context = self.values();
        for a in &self.assumptions {
            if let Some(variable) = formula_variable(&a.id) {
                context.insert(variable.to_string(), a.current_value);
            }
        }
        context
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Assumption, EngineError> {
        self.assumptions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| EngineError::UnknownAssumption(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_list() {
        let registry = AssumptionRegistry::with_defaults();
        assert_eq!(registry.len(), 16);
        assert_eq!(registry.value(ids::CLAUDE_INPUT_PRICE).unwrap(), 3.0);
        assert_eq!(registry.value(ids::COST_CONSERVATIVE_FACTOR).unwrap(), 0.90);
        assert_eq!(registry.value(ids::DATA_MATURITY_FACTOR).unwrap(), 0.75);
        for a in registry.iter() {
            assert!(a.min <= a.default_value && a.default_value <= a.max, "{}", a.id);
            assert!(!a.sources.is_empty(), "{}", a.id);
        }
    }

    #[test]
    fn test_formula_context_uses_variable_names() {
        let mut registry = AssumptionRegistry::with_defaults();
        registry.update(ids::ADOPTION_RATE, 0.6).unwrap();
        let context = registry.formula_context();
        assert_eq!(context.get(vars::ADOPTION_RATE), Some(&0.6));
        assert_eq!(context.get(ids::ADOPTION_RATE), Some(&0.6));
        assert_eq!(context.get(vars::INPUT_PRICE), Some(&3.0));
        assert_eq!(context.get(vars::RISK_FACTOR), Some(&0.8));
        assert!(!context.contains_key(vars::HOURLY_RATE));
        assert_eq!(formula_variable(ids::ANALYST_HOURLY_RATE), None);
    }

    #[test]
    fn test_labor_rates_are_hourly() {
        let registry = AssumptionRegistry::with_defaults();
        for id in [ids::ANALYST_HOURLY_RATE, ids::ENGINEER_HOURLY_RATE, ids::CSM_HOURLY_RATE] {
            assert_eq!(registry.get(id).unwrap().unit, Unit::UsdPerHour, "{}", id);
        }
    }

    #[test]
    fn test_update_within_bounds() {
        let mut registry = AssumptionRegistry::with_defaults();
        let previous = registry.update(ids::ANALYST_HOURLY_RATE, 100.0).unwrap();
        assert_eq!(previous, 85.0);
        let a = registry.get(ids::ANALYST_HOURLY_RATE).unwrap();
        assert_eq!(a.current_value, 100.0);
        assert!(a.is_user_override);
    }

    #[test]
    fn test_update_at_bounds_is_accepted() {
        let mut registry = AssumptionRegistry::with_defaults();
        assert!(registry.update(ids::DATA_MATURITY_FACTOR, 0.25).is_ok());
        assert!(registry.update(ids::DATA_MATURITY_FACTOR, 1.0).is_ok());
    }

    #[test]
    fn test_out_of_range_rejected_not_clamped() {
        let mut registry = AssumptionRegistry::with_defaults();
        let err = registry.update(ids::ANALYST_HOURLY_RATE, 10.0).unwrap_err();
        assert!(err.to_string().contains("below minimum"));
        let err = registry.update(ids::ANALYST_HOURLY_RATE, 10_000.0).unwrap_err();
        assert!(err.to_string().contains("above maximum"));
        assert!(matches!(registry.update(ids::ANALYST_HOURLY_RATE, f64::NAN), Err(EngineError::NotFinite { .. })));

        let a = registry.get(ids::ANALYST_HOURLY_RATE).unwrap();
        assert_eq!(a.current_value, 85.0);
        assert!(!a.is_user_override);
    }

    #[test]
    fn test_unknown_assumption() {
        let mut registry = AssumptionRegistry::with_defaults();
        assert_eq!(
            registry.update("nope", 1.0),
            Err(EngineError::UnknownAssumption("nope".into()))
        );
        assert!(registry.reset("nope").is_err());
    }

    #[test]
    fn test_reset_restores_default() {
        let mut registry = AssumptionRegistry::with_defaults();
        registry.update(ids::ADOPTION_RATE, 0.5).unwrap();
        registry.reset(ids::ADOPTION_RATE).unwrap();
        let a = registry.get(ids::ADOPTION_RATE).unwrap();
        assert_eq!(a.current_value, a.default_value);
        assert!(!a.is_user_override);
    }

    #[test]
    fn test_reset_all() {
        let mut registry = AssumptionRegistry::with_defaults();
        registry.update(ids::ADOPTION_RATE, 0.5).unwrap();
        registry.update(ids::VALUE_WEIGHT, 50.0).unwrap();
        registry.reset_all();
        assert_eq!(registry, AssumptionRegistry::with_defaults());
    }

    #[test]
    fn test_by_category_order() {
        let registry = AssumptionRegistry::with_defaults();
        let grouped = registry.by_category();
        let cats: Vec<_> = grouped.iter().map(|(c, _)| *c).collect();
        assert_eq!(cats, AssumptionCategory::ALL.to_vec());
        let weights = &grouped.last().unwrap().1;
        assert_eq!(weights.len(), 3);
    }
}
