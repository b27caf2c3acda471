//! Per-opportunity uncertainty analysis.
//!
//! Each opportunity's four raw driver estimates and the data maturity factor
//! are treated as triangular distributions and propagated through
//! `risk_adjusted_value`. Conservative factors stay fixed at their current
//! assumption values.

use std::cmp::Reverse;

use calcgraph_engine::assumptions::ids as assumption_ids;
use calcgraph_engine::formulas::{ids, vars};
use calcgraph_engine::{CalcEngine, ConfidenceLevel, Context, MonteCarloResult, UncertainVariable, Unit};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::report::apply_maturity;
use crate::research::{ImpactRange, Research, UseCase};

/// Default spread around a point estimate when no range was given.
const DEFAULT_LOW: f64 = 0.7;
const DEFAULT_HIGH: f64 = 1.1;

const MATURITY_FLOOR: f64 = 0.5;
const MATURITY_CEILING: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyReport {
    pub company_name: String,
    pub generated_at: DateTime<Utc>,
    pub formula_id: String,
    pub sample_size: usize,
    pub seed: u64,
    pub opportunities: Vec<OpportunityUncertainty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityUncertainty {
    pub id: String,
    pub name: String,
    /// Risk-adjusted value at the point estimates.
    pub point_estimate: f64,
    pub distribution: MonteCarloResult,
    /// Widest input range first.
    pub sensitivity: Vec<SensitivityEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityEntry {
    pub variable_id: String,
    pub label: String,
    pub low: f64,
    pub mode: f64,
    pub high: f64,
    pub spread_percent: f64,
}

fn driver(id: &str, label: &str, point: f64, range: Option<ImpactRange>) -> UncertainVariable {
    match range {
        Some(r) => UncertainVariable::triangular(id, r.low, point, r.high, Unit::UsdPerYear)
            .with_label(label)
            .with_confidence(ConfidenceLevel::High),
        None => UncertainVariable::triangular(id, point * DEFAULT_LOW, point, point * DEFAULT_HIGH, Unit::UsdPerYear)
            .with_label(label),
    }
}

fn variables(uc: &UseCase, maturity: f64) -> Vec<UncertainVariable> {
    let b = &uc.benefits;
    let r = &uc.impact_ranges;
    vec![
        driver(vars::REVENUE_BASE, "Revenue impact", b.revenue, r.revenue),
        driver(vars::COST_BASE, "Cost impact", b.cost, r.cost),
        driver(vars::CASH_FLOW_BASE, "Cash flow impact", b.cash_flow, r.cash_flow),
        driver(vars::RISK_BASE, "Risk reduction", b.risk, r.risk),
        UncertainVariable::triangular(
            vars::DATA_MATURITY_FACTOR,
            MATURITY_FLOOR.min(maturity),
            maturity,
            MATURITY_CEILING.max(maturity),
            Unit::Ratio,
        )
        .with_label("Data maturity factor")
        .with_confidence(ConfidenceLevel::Low),
    ]
}

fn sensitivity(variables: &[UncertainVariable]) -> Vec<SensitivityEntry> {
    let mut entries: Vec<SensitivityEntry> = variables
        .iter()
        .map(|v| SensitivityEntry {
            variable_id: v.id.clone(),
            label: v.label.clone(),
            low: v.low,
            mode: v.mode,
            high: v.high,
            spread_percent: v.spread_percent(),
        })
        .collect();
    entries.sort_by_key(|e| Reverse(OrderedFloat(e.spread_percent)));
    entries
}

/// Run the analysis. Opportunity `i` is sampled with `seed + i` so adding
/// an opportunity never changes the draws of the ones before it.
pub fn analyze(engine: &mut CalcEngine, research: &Research, sample_size: usize, seed: u64) -> Result<UncertaintyReport> {
    let maturity = apply_maturity(engine, research.overview.data_maturity_level)?;

    let fixed: Context = [
        (vars::REVENUE_FACTOR, assumption_ids::REVENUE_CONSERVATIVE_FACTOR),
        (vars::COST_FACTOR, assumption_ids::COST_CONSERVATIVE_FACTOR),
        (vars::CASH_FLOW_FACTOR, assumption_ids::CASHFLOW_CONSERVATIVE_FACTOR),
        (vars::RISK_FACTOR, assumption_ids::RISK_CONSERVATIVE_FACTOR),
    ]
    .into_iter()
    .map(|(var, id)| Ok((var.to_string(), engine.assumption_value(id)?)))
    .collect::<Result<_>>()?;

    let mut opportunities = Vec::with_capacity(research.use_cases.len());
    for (i, uc) in research.use_cases.iter().enumerate() {
        let inputs = variables(uc, maturity);

        let mut point_context = fixed.clone();
        point_context.extend(inputs.iter().map(|v| (v.id.clone(), v.mode)));
        let point_estimate = engine.evaluate_formula(ids::RISK_ADJUSTED_VALUE, &point_context)?.value();

        let distribution = engine.run_monte_carlo(
            &inputs,
            ids::RISK_ADJUSTED_VALUE,
            sample_size,
            seed.wrapping_add(i as u64),
            &fixed,
        )?;

        opportunities.push(OpportunityUncertainty {
            id: uc.id.clone(),
            name: uc.name.clone(),
            point_estimate,
            distribution,
            sensitivity: sensitivity(&inputs),
        });
    }

    log::info!(
        "uncertainty analysis for {}: {} opportunities x {} samples",
        research.company_name,
        opportunities.len(),
        sample_size
    );

    Ok(UncertaintyReport {
        company_name: research.company_name.clone(),
        generated_at: Utc::now(),
        formula_id: ids::RISK_ADJUSTED_VALUE.to_string(),
        sample_size,
        seed,
        opportunities,
    })
}
