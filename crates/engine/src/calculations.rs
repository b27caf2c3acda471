//! Opportunity-level calculations built from the standard formulas.

use serde::{Deserialize, Serialize};

use crate::assumptions::ids as assumption_ids;
use crate::engine::CalcEngine;
use crate::error::EngineError;
use crate::formulas::{ids, vars, Context};
use crate::value::CalculatedValue;

/// Raw annual benefit estimates for the four value drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBenefits {
    pub revenue: f64,
    pub cost: f64,
    pub cash_flow: f64,
    pub risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverBenefits {
    pub revenue: CalculatedValue,
    pub cost: CalculatedValue,
    pub cash_flow: CalculatedValue,
    pub risk: CalculatedValue,
    pub total_annual_value: CalculatedValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens_per_run: f64,
    pub output_tokens_per_run: f64,
    pub runs_per_month: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCosts {
    pub monthly_tokens: f64,
    pub monthly_cost: CalculatedValue,
    pub annual_cost: CalculatedValue,
    pub per_run_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityInputs {
    pub total_impact: f64,
    pub max_impact: f64,
    pub time_to_value_months: f64,
    /// 0-100, higher means more effort.
    pub effort_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityScores {
    pub value_score: CalculatedValue,
    pub ttv_score: CalculatedValue,
    pub priority_score: CalculatedValue,
}

fn ctx<const N: usize>(pairs: [(&str, f64); N]) -> Context {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl CalcEngine {
    /// Apply conservative and data-maturity factors to each driver and sum.
    pub fn calculate_driver_benefits(&mut self, raw: &RawBenefits) -> Result<DriverBenefits, EngineError> {
        let maturity = self.assumption_value(assumption_ids::DATA_MATURITY_FACTOR)?;

        let revenue = self.driver(raw.revenue, assumption_ids::REVENUE_CONSERVATIVE_FACTOR, maturity)?;
        let cost = self.driver(raw.cost, assumption_ids::COST_CONSERVATIVE_FACTOR, maturity)?;
        let cash_flow = self.driver(raw.cash_flow, assumption_ids::CASHFLOW_CONSERVATIVE_FACTOR, maturity)?;
        let risk = self.driver(raw.risk, assumption_ids::RISK_CONSERVATIVE_FACTOR, maturity)?;

        let total_annual_value = self.evaluate_formula(
            ids::TOTAL_ANNUAL_VALUE,
            &ctx([
                (vars::REVENUE_BENEFIT, revenue.value()),
                (vars::COST_BENEFIT, cost.value()),
                (vars::CASH_FLOW_BENEFIT, cash_flow.value()),
                (vars::RISK_BENEFIT, risk.value()),
            ]),
        )?;

        Ok(DriverBenefits { revenue, cost, cash_flow, risk, total_annual_value })
    }

    fn driver(&mut self, base: f64, factor_id: &str, maturity: f64) -> Result<CalculatedValue, EngineError> {
        let factor = self.assumption_value(factor_id)?;
        self.evaluate_formula(
            ids::DRIVER_BENEFIT,
            &ctx([
                (vars::BASE_BENEFIT, base),
                (vars::CONSERVATIVE_FACTOR, factor),
                (vars::DATA_MATURITY_FACTOR, maturity),
            ]),
        )
    }

    /// Monthly and annual token spend at the current price assumptions.
    pub fn calculate_token_costs(&mut self, usage: &TokenUsage) -> Result<TokenCosts, EngineError> {
        let input_tokens = usage.input_tokens_per_run * usage.runs_per_month;
        let output_tokens = usage.output_tokens_per_run * usage.runs_per_month;

        let monthly_cost = self.evaluate_formula(
            ids::TOKEN_COST_MONTHLY,
            &ctx([
                (vars::INPUT_TOKENS, input_tokens),
                (vars::OUTPUT_TOKENS, output_tokens),
                (vars::INPUT_PRICE, self.assumption_value(assumption_ids::CLAUDE_INPUT_PRICE)?),
                (vars::OUTPUT_PRICE, self.assumption_value(assumption_ids::CLAUDE_OUTPUT_PRICE)?),
            ]),
        )?;
        let annual_cost = self.evaluate_formula(
            ids::TOKEN_COST_ANNUAL,
            &ctx([(vars::MONTHLY_COST, monthly_cost.value())]),
        )?;

        let per_run_cost = if usage.runs_per_month > 0.0 {
            monthly_cost.value() / usage.runs_per_month
        } else {
            0.0
        };

        Ok(TokenCosts {
            monthly_tokens: input_tokens + output_tokens,
            monthly_cost,
            annual_cost,
            per_run_cost,
        })
    }

    /// Value, time-to-value and priority scores using the weight assumptions.
    pub fn calculate_priority(&mut self, inputs: &PriorityInputs) -> Result<PriorityScores, EngineError> {
        let value_score = self.evaluate_formula(
            ids::VALUE_SCORE,
            &ctx([(vars::TOTAL_IMPACT, inputs.total_impact), (vars::MAX_IMPACT, inputs.max_impact)]),
        )?;
        let ttv_score = self.evaluate_formula(
            ids::TTV_SCORE,
            &ctx([(vars::TIME_TO_VALUE_MONTHS, inputs.time_to_value_months)]),
        )?;
        let priority_score = self.evaluate_formula(
            ids::PRIORITY_SCORE,
            &ctx([
                (vars::VALUE_SCORE, value_score.value()),
                (vars::TTV_SCORE, ttv_score.value()),
                (vars::EFFORT_SCORE, inputs.effort_score),
                (vars::VALUE_WEIGHT, self.assumption_value(assumption_ids::VALUE_WEIGHT)?),
                (vars::TTV_WEIGHT, self.assumption_value(assumption_ids::TTV_WEIGHT)?),
                (vars::EFFORT_WEIGHT, self.assumption_value(assumption_ids::EFFORT_WEIGHT)?),
            ]),
        )?;

        Ok(PriorityScores { value_score, ttv_score, priority_score })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_full_rollup_with_default_factors() {
        let mut engine = CalcEngine::new();
        let b = engine
            .calculate_driver_benefits(&RawBenefits {
                revenue: 1_000_000.0,
                cost: 500_000.0,
                cash_flow: 300_000.0,
                risk: 200_000.0,
            })
            .unwrap();
        assert!(close(b.revenue.value(), 712_500.0));
        assert!(close(b.cost.value(), 337_500.0));
        assert!(close(b.cash_flow.value(), 191_250.0));
        assert!(close(b.risk.value(), 120_000.0));
        assert!(close(b.total_annual_value.value(), 1_361_250.0));
        assert_eq!(b.total_annual_value.unit(), Unit::UsdPerYear);
    }

    #[test]
    fn test_maturity_override_changes_benefits() {
        let mut engine = CalcEngine::new();
        engine.update_assumption(assumption_ids::DATA_MATURITY_FACTOR, 0.5).unwrap();
        let b = engine
            .calculate_driver_benefits(&RawBenefits { revenue: 1_000_000.0, ..Default::default() })
            .unwrap();
        assert!(close(b.revenue.value(), 475_000.0));
    }

    #[test]
    fn test_token_costs() {
        let mut engine = CalcEngine::new();
        let costs = engine
            .calculate_token_costs(&TokenUsage {
                input_tokens_per_run: 10_000.0,
                output_tokens_per_run: 5_000.0,
                runs_per_month: 100.0,
            })
            .unwrap();
        assert_eq!(costs.monthly_tokens, 1_500_000.0);
        assert!(close(costs.monthly_cost.value(), 10.5));
        assert!(close(costs.annual_cost.value(), 126.0));
        assert!(close(costs.per_run_cost, 0.105));
    }

    #[test]
    fn test_zero_runs_has_zero_per_run_cost() {
        let mut engine = CalcEngine::new();
        let costs = engine.calculate_token_costs(&TokenUsage::default()).unwrap();
        assert_eq!(costs.per_run_cost, 0.0);
        assert_eq!(costs.monthly_cost.value(), 0.0);
        assert!(costs.monthly_cost.is_ok());
    }

    #[test]
    fn test_priority_uses_weight_assumptions() {
        let mut engine = CalcEngine::new();
        let scores = engine
            .calculate_priority(&PriorityInputs {
                total_impact: 500.0,
                max_impact: 1_000.0,
                time_to_value_months: 0.0,
                effort_score: 50.0,
            })
            .unwrap();
        assert!(close(scores.value_score.value(), 50.0));
        assert!(close(scores.ttv_score.value(), 100.0));
        // (50*40 + 100*30 + 50*30) / 100
        assert!(close(scores.priority_score.value(), 65.0));

        engine.update_assumption(assumption_ids::EFFORT_WEIGHT, 0.0).unwrap();
        let scores = engine
            .calculate_priority(&PriorityInputs {
                total_impact: 500.0,
                max_impact: 1_000.0,
                time_to_value_months: 0.0,
                effort_score: 50.0,
            })
            .unwrap();
        assert!(close(scores.priority_score.value(), 50.0));
    }

    #[test]
    fn test_higher_effort_lowers_priority() {
        let mut engine = CalcEngine::new();
        let mut inputs = PriorityInputs {
            total_impact: 800.0,
            max_impact: 1_000.0,
            time_to_value_months: 3.0,
            effort_score: 20.0,
        };
        let easy = engine.calculate_priority(&inputs).unwrap().priority_score.value();
        inputs.effort_score = 80.0;
        let hard = engine.calculate_priority(&inputs).unwrap().priority_score.value();
        assert!(hard < easy);
        assert!(close(easy - hard, 60.0 * 30.0 / 100.0));
    }
}
