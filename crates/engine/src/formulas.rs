//! Formula registry.
//!
//! Every formula is a plain `fn(&Context) -> f64` registered under an id and
//! a version. An id+version pair is registered once and never replaced, so a
//! stored `CalculatedValue` can always be recomputed from its inputs
//! snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::units::Unit;

/// Variable name -> value, as seen by a formula.
pub type Context = BTreeMap<String, f64>;

pub const FORMULA_VERSION: &str = "2.0.0";

/// Context keys read by the standard formulas.
pub mod vars {
    pub const BASE_BENEFIT: &str = "baseBenefit";
    pub const CONSERVATIVE_FACTOR: &str = "conservativeFactor";
    pub const DATA_MATURITY_FACTOR: &str = "dataMaturityFactor";

    pub const REVENUE_BENEFIT: &str = "revenueBenefit";
    pub const COST_BENEFIT: &str = "costBenefit";
    pub const CASH_FLOW_BENEFIT: &str = "cashFlowBenefit";
    pub const RISK_BENEFIT: &str = "riskBenefit";

    pub const INPUT_TOKENS: &str = "inputTokens";
    pub const OUTPUT_TOKENS: &str = "outputTokens";
    pub const INPUT_PRICE: &str = "inputPricePerMillion";
    pub const OUTPUT_PRICE: &str = "outputPricePerMillion";
    pub const MONTHLY_COST: &str = "monthlyCost";

    pub const HOURS_SAVED: &str = "hoursSaved";
    pub const HOURLY_RATE: &str = "hourlyRate";
    pub const ADOPTION_RATE: &str = "adoptionRate";

    pub const TOTAL_IMPACT: &str = "totalImpact";
    pub const MAX_IMPACT: &str = "maxImpact";
    pub const TIME_TO_VALUE_MONTHS: &str = "timeToValueMonths";
    pub const VALUE_SCORE: &str = "valueScore";
    pub const TTV_SCORE: &str = "ttvScore";
    pub const EFFORT_SCORE: &str = "effortScore";
    pub const VALUE_WEIGHT: &str = "valueWeight";
    pub const TTV_WEIGHT: &str = "ttvWeight";
    pub const EFFORT_WEIGHT: &str = "effortWeight";

    pub const TOTAL_BENEFIT: &str = "totalBenefit";
    pub const TOTAL_COST: &str = "totalCost";
    pub const INITIAL_INVESTMENT: &str = "initialInvestment";
    pub const ANNUAL_BENEFIT: &str = "annualBenefit";
    pub const TOTAL_ANNUAL_VALUE: &str = "totalAnnualValue";
    pub const TOTAL_ANNUAL_TOKENS: &str = "totalAnnualTokens";

    pub const AMOUNT: &str = "amount";
    pub const INCREMENT: &str = "increment";

    pub const REVENUE_BASE: &str = "revenueBase";
    pub const COST_BASE: &str = "costBase";
    pub const CASH_FLOW_BASE: &str = "cashFlowBase";
    pub const RISK_BASE: &str = "riskBase";
    pub const REVENUE_FACTOR: &str = "revenueFactor";
    pub const COST_FACTOR: &str = "costFactor";
    pub const CASH_FLOW_FACTOR: &str = "cashFlowFactor";
    pub const RISK_FACTOR: &str = "riskFactor";
}

/// Standard formula ids.
pub mod ids {
    pub const DRIVER_BENEFIT: &str = "driver_benefit";
    pub const TOTAL_ANNUAL_VALUE: &str = "total_annual_value";
    pub const TOKEN_COST_MONTHLY: &str = "token_cost_monthly";
    pub const TOKEN_COST_ANNUAL: &str = "token_cost_annual";
    pub const HOURS_SAVED_VALUE: &str = "hours_saved_value";
    pub const VALUE_SCORE: &str = "value_score";
    pub const TTV_SCORE: &str = "ttv_score";
    pub const PRIORITY_SCORE: &str = "priority_score";
    pub const ROI_PERCENTAGE: &str = "roi_percentage";
    pub const PAYBACK_PERIOD: &str = "payback_period";
    pub const VALUE_PER_MILLION_TOKENS: &str = "value_per_million_tokens";
    pub const FLOOR_TO_INCREMENT: &str = "floor_to_increment";
    pub const RISK_ADJUSTED_VALUE: &str = "risk_adjusted_value";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaCategory {
    Benefits,
    Costs,
    Scoring,
    Financial,
    Aggregation,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub category: FormulaCategory,
    pub derivation: &'static str,
    pub required_variables: &'static [&'static str],
    pub output_unit: Unit,
    #[serde(skip)]
    compute: fn(&Context) -> f64,
}

impl std::fmt::Debug for FormulaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormulaDefinition")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("output_unit", &self.output_unit)
            .finish()
    }
}

impl FormulaDefinition {
    pub fn new(
        id: &'static str,
        version: &'static str,
        output_unit: Unit,
        required_variables: &'static [&'static str],
        compute: fn(&Context) -> f64,
    ) -> Self {
        Self {
            id,
            name: id,
            version,
            category: FormulaCategory::Aggregation,
            derivation: "",
            required_variables,
            output_unit,
            compute,
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_category(mut self, category: FormulaCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_derivation(mut self, derivation: &'static str) -> Self {
        self.derivation = derivation;
        self
    }

    /// Required variables absent from `context`, in declaration order.
    pub fn missing_variables(&self, context: &Context) -> Vec<String> {
        self.required_variables
            .iter()
            .filter(|v| !context.contains_key(**v))
            .map(|v| v.to_string())
            .collect()
    }

    /// Run the formula. Callers check `missing_variables` first; an absent
    /// variable reads as NaN.
    pub fn evaluate(&self, context: &Context) -> f64 {
        (self.compute)(context)
    }
}

fn get(ctx: &Context, key: &str) -> f64 {
    ctx.get(key).copied().unwrap_or(f64::NAN)
}

// ============================================================================
// Standard formulas
// ============================================================================

fn driver_benefit(ctx: &Context) -> f64 {
    get(ctx, vars::BASE_BENEFIT) * get(ctx, vars::CONSERVATIVE_FACTOR) * get(ctx, vars::DATA_MATURITY_FACTOR)
}

fn total_annual_value(ctx: &Context) -> f64 {
    get(ctx, vars::REVENUE_BENEFIT)
        + get(ctx, vars::COST_BENEFIT)
        + get(ctx, vars::CASH_FLOW_BENEFIT)
        + get(ctx, vars::RISK_BENEFIT)
}

fn token_cost_monthly(ctx: &Context) -> f64 {
    get(ctx, vars::INPUT_TOKENS) * get(ctx, vars::INPUT_PRICE) / 1_000_000.0
        + get(ctx, vars::OUTPUT_TOKENS) * get(ctx, vars::OUTPUT_PRICE) / 1_000_000.0
}

fn token_cost_annual(ctx: &Context) -> f64 {
    get(ctx, vars::MONTHLY_COST) * 12.0
}

fn hours_saved_value(ctx: &Context) -> f64 {
    get(ctx, vars::HOURS_SAVED) * get(ctx, vars::HOURLY_RATE) * get(ctx, vars::ADOPTION_RATE)
}

fn value_score(ctx: &Context) -> f64 {
    let raw = get(ctx, vars::TOTAL_IMPACT) / get(ctx, vars::MAX_IMPACT) * 100.0;
    // f64::min would swallow NaN
    if raw.is_nan() { raw } else { raw.min(100.0) }
}

fn ttv_score(ctx: &Context) -> f64 {
    (100.0 - get(ctx, vars::TIME_TO_VALUE_MONTHS) * 8.33).max(0.0)
}

fn priority_score(ctx: &Context) -> f64 {
    (get(ctx, vars::VALUE_SCORE) * get(ctx, vars::VALUE_WEIGHT)
        + get(ctx, vars::TTV_SCORE) * get(ctx, vars::TTV_WEIGHT)
        + (100.0 - get(ctx, vars::EFFORT_SCORE)) * get(ctx, vars::EFFORT_WEIGHT))
        / 100.0
}

fn roi_percentage(ctx: &Context) -> f64 {
    let cost = get(ctx, vars::TOTAL_COST);
    (get(ctx, vars::TOTAL_BENEFIT) - cost) / cost * 100.0
}

fn payback_period(ctx: &Context) -> f64 {
    get(ctx, vars::INITIAL_INVESTMENT) / get(ctx, vars::ANNUAL_BENEFIT)
}

fn value_per_million_tokens(ctx: &Context) -> f64 {
    get(ctx, vars::TOTAL_ANNUAL_VALUE) / get(ctx, vars::TOTAL_ANNUAL_TOKENS) * 1_000_000.0
}

fn floor_to_increment(ctx: &Context) -> f64 {
    let increment = get(ctx, vars::INCREMENT);
    (get(ctx, vars::AMOUNT) / increment).floor() * increment
}

fn risk_adjusted_value(ctx: &Context) -> f64 {
    (get(ctx, vars::REVENUE_BASE) * get(ctx, vars::REVENUE_FACTOR)
        + get(ctx, vars::COST_BASE) * get(ctx, vars::COST_FACTOR)
        + get(ctx, vars::CASH_FLOW_BASE) * get(ctx, vars::CASH_FLOW_FACTOR)
        + get(ctx, vars::RISK_BASE) * get(ctx, vars::RISK_FACTOR))
        * get(ctx, vars::DATA_MATURITY_FACTOR)
}

fn standard_formulas() -> Vec<FormulaDefinition> {
    use FormulaCategory::*;
    vec![
        FormulaDefinition::new(
            ids::DRIVER_BENEFIT, FORMULA_VERSION, Unit::UsdPerYear,
            &[vars::BASE_BENEFIT, vars::CONSERVATIVE_FACTOR, vars::DATA_MATURITY_FACTOR],
            driver_benefit,
        )
        .with_name("Driver Benefit with Conservative Factors")
        .with_category(Benefits)
        .with_derivation("benefit = baseBenefit × conservativeFactor × dataMaturityFactor"),
        FormulaDefinition::new(
            ids::TOTAL_ANNUAL_VALUE, FORMULA_VERSION, Unit::UsdPerYear,
            &[vars::REVENUE_BENEFIT, vars::COST_BENEFIT, vars::CASH_FLOW_BENEFIT, vars::RISK_BENEFIT],
            total_annual_value,
        )
        .with_name("Total Annual Value")
        .with_category(Benefits)
        .with_derivation("total = revenueBenefit + costBenefit + cashFlowBenefit + riskBenefit"),
        FormulaDefinition::new(
            ids::TOKEN_COST_MONTHLY, FORMULA_VERSION, Unit::UsdPerMonth,
            &[vars::INPUT_TOKENS, vars::OUTPUT_TOKENS, vars::INPUT_PRICE, vars::OUTPUT_PRICE],
            token_cost_monthly,
        )
        .with_name("Monthly Token Cost")
        .with_category(Costs)
        .with_derivation(
            "cost = inputTokens × inputPricePerMillion / 1e6 + outputTokens × outputPricePerMillion / 1e6",
        ),
        FormulaDefinition::new(
            ids::TOKEN_COST_ANNUAL, FORMULA_VERSION, Unit::UsdPerYear,
            &[vars::MONTHLY_COST],
            token_cost_annual,
        )
        .with_name("Annual Token Cost")
        .with_category(Costs)
        .with_derivation("annual = monthlyCost × 12"),
        FormulaDefinition::new(
            ids::HOURS_SAVED_VALUE, FORMULA_VERSION, Unit::UsdPerYear,
            &[vars::HOURS_SAVED, vars::HOURLY_RATE, vars::ADOPTION_RATE],
            hours_saved_value,
        )
        .with_name("Value of Hours Saved")
        .with_category(Benefits)
        .with_derivation("value = hoursSaved × hourlyRate × adoptionRate"),
        FormulaDefinition::new(
            ids::VALUE_SCORE, FORMULA_VERSION, Unit::Score,
            &[vars::TOTAL_IMPACT, vars::MAX_IMPACT],
            value_score,
        )
        .with_name("Value Score")
        .with_category(Scoring)
        .with_derivation("score = min(100, totalImpact / maxImpact × 100)"),
        FormulaDefinition::new(
            ids::TTV_SCORE, FORMULA_VERSION, Unit::Score,
            &[vars::TIME_TO_VALUE_MONTHS],
            ttv_score,
        )
        .with_name("Time-to-Value Score")
        .with_category(Scoring)
        .with_derivation("score = max(0, 100 − timeToValueMonths × 8.33)"),
        FormulaDefinition::new(
            ids::PRIORITY_SCORE, FORMULA_VERSION, Unit::Score,
            &[
                vars::VALUE_SCORE, vars::TTV_SCORE, vars::EFFORT_SCORE,
                vars::VALUE_WEIGHT, vars::TTV_WEIGHT, vars::EFFORT_WEIGHT,
            ],
            priority_score,
        )
        .with_name("Priority Score")
        .with_category(Scoring)
        .with_derivation(
            "priority = (valueScore × valueWeight + ttvScore × ttvWeight + (100 − effortScore) × effortWeight) / 100",
        ),
        FormulaDefinition::new(
            ids::ROI_PERCENTAGE, FORMULA_VERSION, Unit::Percent,
            &[vars::TOTAL_BENEFIT, vars::TOTAL_COST],
            roi_percentage,
        )
        .with_name("Return on Investment")
        .with_category(Financial)
        .with_derivation("roi = (totalBenefit − totalCost) / totalCost × 100"),
        FormulaDefinition::new(
            ids::PAYBACK_PERIOD, FORMULA_VERSION, Unit::Years,
            &[vars::INITIAL_INVESTMENT, vars::ANNUAL_BENEFIT],
            payback_period,
        )
        .with_name("Payback Period")
        .with_category(Financial)
        .with_derivation("payback = initialInvestment / annualBenefit"),
        FormulaDefinition::new(
            ids::VALUE_PER_MILLION_TOKENS, FORMULA_VERSION, Unit::UsdPerMillionTokens,
            &[vars::TOTAL_ANNUAL_VALUE, vars::TOTAL_ANNUAL_TOKENS],
            value_per_million_tokens,
        )
        .with_name("Value per Million Tokens")
        .with_category(Financial)
        .with_derivation("value = totalAnnualValue / totalAnnualTokens × 1e6"),
        FormulaDefinition::new(
            ids::FLOOR_TO_INCREMENT, FORMULA_VERSION, Unit::UsdPerYear,
            &[vars::AMOUNT, vars::INCREMENT],
            floor_to_increment,
        )
        .with_name("Round Down to Reporting Increment")
        .with_category(Aggregation)
        .with_derivation("rounded = floor(amount / increment) × increment"),
        FormulaDefinition::new(
            ids::RISK_ADJUSTED_VALUE, FORMULA_VERSION, Unit::UsdPerYear,
            &[
                vars::REVENUE_BASE, vars::COST_BASE, vars::CASH_FLOW_BASE, vars::RISK_BASE,
                vars::REVENUE_FACTOR, vars::COST_FACTOR, vars::CASH_FLOW_FACTOR, vars::RISK_FACTOR,
                vars::DATA_MATURITY_FACTOR,
            ],
            risk_adjusted_value,
        )
        .with_name("Risk-Adjusted Opportunity Value")
        .with_category(Benefits)
        .with_derivation(
            "value = (revenueBase × revenueFactor + costBase × costFactor + cashFlowBase × cashFlowFactor + riskBase × riskFactor) × dataMaturityFactor",
        ),
    ]
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FormulaRegistry {
    formulas: Vec<FormulaDefinition>,
}

impl FormulaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in formula set.
    pub fn standard() -> Self {
        Self { formulas: standard_formulas() }
    }

    pub fn register(&mut self, definition: FormulaDefinition) -> Result<(), EngineError> {
        if self.get_version(definition.id, definition.version).is_some() {
            return Err(EngineError::DuplicateFormula {
                id: definition.id.to_string(),
                version: definition.version.to_string(),
            });
        }
        self.formulas.push(definition);
        Ok(())
    }

    /// Most recently registered version of `id`.
    pub fn get(&self, id: &str) -> Option<&FormulaDefinition> {
        self.formulas.iter().rev().find(|f| f.id == id)
    }

    pub fn get_version(&self, id: &str, version: &str) -> Option<&FormulaDefinition> {
        self.formulas.iter().find(|f| f.id == id && f.version == version)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormulaDefinition> {
        self.formulas.iter()
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}
