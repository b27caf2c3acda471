//! Calculated report assembly.
//!
//! [`assemble`] runs the whole calculation pipeline for one validated
//! research payload on one engine. Per-opportunity values stay exact; the
//! dashboard benefit totals are the only rounded figures and are rounded
//! here, after dimension-checked aggregation.

use std::cmp::Reverse;

use calcgraph_config::ReportSettings;
use calcgraph_engine::assumptions::ids as assumption_ids;
use calcgraph_engine::formulas::{ids, vars};
use calcgraph_engine::{
    Assumption, AuditEntry, CalcEngine, CalculatedValue, Context, DriverBenefits, PriorityInputs, PriorityScores,
    TokenCosts, Unit, ENGINE_VERSION,
};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::research::{Effort, Research, Severity, UseCase};
use crate::scoring::{self, Phase, PriorityTier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedReport {
    pub report_id: Uuid,
    pub company_name: String,
    pub generated_at: DateTime<Utc>,
    pub calculation_engine_version: String,
    pub assumptions: Vec<Assumption>,
    pub company_overview: CompanyOverviewSection,
    pub use_cases: Vec<UseCaseResult>,
    pub executive_dashboard: ExecutiveDashboard,
    pub audit_trail: Vec<AuditEntry>,
    /// Fingerprint of the assumption values and formula versions used.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyOverviewSection {
    pub position: String,
    pub industry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_employees: Option<f64>,
    pub data_maturity_level: u8,
    pub data_maturity_factor: f64,
    pub friction_table: Vec<FrictionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub domain: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Full annual cost of the friction, not adoption-adjusted.
    pub annual_burden: CalculatedValue,
    pub strategic_impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseResult {
    pub id: String,
    pub name: String,
    pub function: String,
    pub sub_function: String,
    pub description: String,
    pub target_friction: String,
    pub hitl_checkpoint: String,
    pub ai_primitives: Vec<String>,
    pub benefits: DriverBenefits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_saved_value: Option<CalculatedValue>,
    pub token_costs: TokenCosts,
    pub scoring: Scoring,
    pub effort: Effort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scoring {
    pub value_score: CalculatedValue,
    pub ttv_score: CalculatedValue,
    pub effort_score: f64,
    pub priority_score: CalculatedValue,
    pub priority_tier: PriorityTier,
    pub recommended_phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveDashboard {
    pub total_revenue_benefit: CalculatedValue,
    pub total_cost_benefit: CalculatedValue,
    pub total_cash_flow_benefit: CalculatedValue,
    pub total_risk_benefit: CalculatedValue,
    pub total_annual_value: CalculatedValue,
    pub total_monthly_tokens: f64,
    pub total_annual_token_cost: CalculatedValue,
    pub implementation_cost: f64,
    pub value_per_million_tokens: CalculatedValue,
    pub roi: CalculatedValue,
    pub payback_period: CalculatedValue,
    pub top_use_cases: Vec<RankedUseCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedUseCase {
    pub rank: usize,
    pub id: String,
    pub name: String,
    pub priority_score: f64,
    pub priority_tier: PriorityTier,
    pub annual_value: f64,
    pub monthly_tokens: f64,
}

fn ctx<const N: usize>(pairs: [(&str, f64); N]) -> Context {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Run the report pipeline on `engine`.
///
/// The engine's data maturity factor follows the company's maturity level
/// unless it has been overridden already.
pub fn assemble(engine: &mut CalcEngine, research: &Research, settings: &ReportSettings) -> Result<CalculatedReport> {
    let overview = &research.overview;
    let data_maturity_factor = apply_maturity(engine, overview.data_maturity_level)?;

    let mut friction_table = Vec::with_capacity(research.friction_points.len());
    for fp in &research.friction_points {
        let annual_burden = engine.evaluate_formula(
            ids::HOURS_SAVED_VALUE,
            &ctx([
                (vars::HOURS_SAVED, fp.annual_hours),
                (vars::HOURLY_RATE, fp.hourly_rate),
                (vars::ADOPTION_RATE, 1.0),
            ]),
        )?;
        friction_table.push(FrictionRow {
            id: fp.id.clone(),
            domain: fp.domain.clone(),
            description: fp.description.clone(),
            severity: fp.severity,
            annual_burden,
            strategic_impact: fp.strategic_impact.clone(),
        });
    }

    let mut partial = Vec::with_capacity(research.use_cases.len());
    for uc in &research.use_cases {
        let benefits = engine.calculate_driver_benefits(&uc.benefits)?;
        let token_costs = engine.calculate_token_costs(&uc.tokens)?;
        let hours_saved_value = hours_saved(engine, uc)?;
        partial.push((uc, benefits, token_costs, hours_saved_value));
    }

    let max_impact = partial
        .iter()
        .map(|(_, b, _, _)| b.total_annual_value.value())
        .fold(0.0_f64, f64::max);

    let mut use_cases = Vec::with_capacity(partial.len());
    for (uc, benefits, token_costs, hours_saved_value) in partial {
        let effort_score = scoring::effort_score(&uc.effort);
        let PriorityScores { value_score, ttv_score, priority_score } = engine.calculate_priority(&PriorityInputs {
            total_impact: benefits.total_annual_value.value(),
            max_impact,
            time_to_value_months: scoring::ttv_months(uc.effort.time_to_value_months),
            effort_score,
        })?;
        let priority_tier = PriorityTier::from_score(priority_score.value());

        use_cases.push(UseCaseResult {
            id: uc.id.clone(),
            name: uc.name.clone(),
            function: uc.function.clone(),
            sub_function: uc.sub_function.clone(),
            description: uc.description.clone(),
            target_friction: uc.target_friction.clone(),
            hitl_checkpoint: uc.hitl_checkpoint.clone(),
            ai_primitives: uc.ai_primitives.clone(),
            benefits,
            hours_saved_value,
            token_costs,
            scoring: Scoring {
                value_score,
                ttv_score,
                effort_score,
                priority_score,
                priority_tier,
                recommended_phase: priority_tier.phase(),
            },
            effort: uc.effort,
        });
    }

    let executive_dashboard = dashboard(engine, &use_cases, settings)?;

    log::info!(
        "assembled report for {} with {} use cases, total annual value {}",
        research.company_name,
        use_cases.len(),
        executive_dashboard.total_annual_value.value()
    );

    Ok(CalculatedReport {
        report_id: Uuid::new_v4(),
        company_name: research.company_name.clone(),
        generated_at: Utc::now(),
        calculation_engine_version: ENGINE_VERSION.to_string(),
        assumptions: engine.assumptions().iter().cloned().collect(),
        company_overview: CompanyOverviewSection {
            position: overview.position.clone(),
            industry: overview.industry.clone(),
            estimated_revenue: overview.estimated_revenue,
            estimated_employees: overview.estimated_employees,
            data_maturity_level: overview.data_maturity_level,
            data_maturity_factor,
            friction_table,
        },
        use_cases,
        executive_dashboard,
        audit_trail: engine.audit_log().to_vec(),
        fingerprint: engine.fingerprint(),
    })
}

/// Set the data maturity factor from the company's level unless the caller
/// already overrode it. Returns the factor in effect.
pub(crate) fn apply_maturity(engine: &mut CalcEngine, level: u8) -> Result<f64> {
    if !engine.assumption(assumption_ids::DATA_MATURITY_FACTOR)?.is_user_override {
        engine.update_assumption(assumption_ids::DATA_MATURITY_FACTOR, scoring::maturity_factor(level))?;
    }
    Ok(engine.assumption_value(assumption_ids::DATA_MATURITY_FACTOR)?)
}

/// Value of hours saved, when the payload estimates them. A missing
/// adoption estimate falls back to the adoption-rate assumption.
fn hours_saved(engine: &mut CalcEngine, uc: &UseCase) -> Result<Option<CalculatedValue>> {
    let (Some(hours), Some(rate)) = (uc.hours_saved, uc.hourly_rate) else {
        return Ok(None);
    };
    let adoption = match uc.adoption_rate {
        Some(a) => a,
        None => engine.assumption_value(assumption_ids::ADOPTION_RATE)?,
    };
    let value = engine.evaluate_formula(
        ids::HOURS_SAVED_VALUE,
        &ctx([(vars::HOURS_SAVED, hours), (vars::HOURLY_RATE, rate), (vars::ADOPTION_RATE, adoption)]),
    )?;
    Ok(Some(value))
}

fn dashboard(engine: &mut CalcEngine, use_cases: &[UseCaseResult], settings: &ReportSettings) -> Result<ExecutiveDashboard> {
    let sum = |engine: &mut CalcEngine, label: &str, pick: fn(&UseCaseResult) -> &CalculatedValue, unit: Unit| {
        let terms: Vec<(&str, &CalculatedValue)> = use_cases.iter().map(|uc| (uc.id.as_str(), pick(uc))).collect();
        engine.sum_values(label, &terms, unit)
    };

    let revenue = sum(engine, "totalRevenueBenefit", |uc| &uc.benefits.revenue, Unit::UsdPerYear)?;
    let cost = sum(engine, "totalCostBenefit", |uc| &uc.benefits.cost, Unit::UsdPerYear)?;
    let cash_flow = sum(engine, "totalCashFlowBenefit", |uc| &uc.benefits.cash_flow, Unit::UsdPerYear)?;
    let risk = sum(engine, "totalRiskBenefit", |uc| &uc.benefits.risk, Unit::UsdPerYear)?;
    let total = sum(engine, "totalAnnualValue", |uc| &uc.benefits.total_annual_value, Unit::UsdPerYear)?;
    let token_cost = sum(engine, "totalAnnualTokenCost", |uc| &uc.token_costs.annual_cost, Unit::UsdPerYear)?;

    let total_monthly_tokens: f64 = use_cases.iter().map(|uc| uc.token_costs.monthly_tokens).sum();
    let implementation_cost = engine.assumption_value(assumption_ids::IMPLEMENTATION_COST_RATIO)? * total.value();
    let total_cost = implementation_cost + token_cost.value();

    let value_per_million_tokens = engine.evaluate_formula(
        ids::VALUE_PER_MILLION_TOKENS,
        &ctx([
            (vars::TOTAL_ANNUAL_VALUE, total.value()),
            (vars::TOTAL_ANNUAL_TOKENS, total_monthly_tokens * 12.0),
        ]),
    )?;
    let roi = engine.evaluate_formula(
        ids::ROI_PERCENTAGE,
        &ctx([(vars::TOTAL_BENEFIT, total.value()), (vars::TOTAL_COST, total_cost)]),
    )?;
    let payback_period = engine.evaluate_formula(
        ids::PAYBACK_PERIOD,
        &ctx([(vars::INITIAL_INVESTMENT, total_cost), (vars::ANNUAL_BENEFIT, total.value())]),
    )?;

    let increment = settings.benefit_rounding_increment;
    let mut floor = |value: &CalculatedValue| -> Result<CalculatedValue> {
        if !value.is_ok() {
            return Ok(value.clone());
        }
        Ok(engine.evaluate_formula(
            ids::FLOOR_TO_INCREMENT,
            &ctx([(vars::AMOUNT, value.value()), (vars::INCREMENT, increment)]),
        )?)
    };

    Ok(ExecutiveDashboard {
        total_revenue_benefit: floor(&revenue)?,
        total_cost_benefit: floor(&cost)?,
        total_cash_flow_benefit: floor(&cash_flow)?,
        total_risk_benefit: floor(&risk)?,
        total_annual_value: floor(&total)?,
        total_monthly_tokens,
        total_annual_token_cost: token_cost,
        implementation_cost,
        value_per_million_tokens,
        roi,
        payback_period,
        top_use_cases: rank(use_cases, settings.top_n),
    })
}

/// Priority descending, then annual value descending, then id.
pub fn rank(use_cases: &[UseCaseResult], top_n: usize) -> Vec<RankedUseCase> {
    let mut ordered: Vec<&UseCaseResult> = use_cases.iter().collect();
    ordered.sort_by_key(|uc| {
        (
            Reverse(OrderedFloat(uc.scoring.priority_score.value())),
            Reverse(OrderedFloat(uc.benefits.total_annual_value.value())),
            uc.id.as_str(),
        )
    });
    ordered
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, uc)| RankedUseCase {
            rank: i + 1,
            id: uc.id.clone(),
            name: uc.name.clone(),
            priority_score: uc.scoring.priority_score.value(),
            priority_tier: uc.scoring.priority_tier,
            annual_value: uc.benefits.total_annual_value.value(),
            monthly_tokens: uc.token_costs.monthly_tokens,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::parse_research;
    use calcgraph_engine::AuditAction;
    use serde_json::json;

    fn use_case(id: &str, cost: f64, readiness: u8, ttv: f64) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("Use case {}", id),
            "estimatedRevenueImpact": 0,
            "estimatedCostImpact": cost,
            "estimatedCashFlowImpact": 0,
            "estimatedRiskReduction": 0,
            "dataReadiness": readiness,
            "integrationComplexity": 2,
            "changeManagement": 2,
            "timeToValueMonths": ttv,
            "inputTokensPerRun": 2000,
            "outputTokensPerRun": 500,
            "runsPerMonth": 1000
        })
    }

    fn research(use_cases: Vec<serde_json::Value>) -> Research {
        parse_research(json!({
            "companyName": "Acme",
            "companyOverview": { "dataMaturityLevel": 3 },
            "frictionPoints": [
                { "domain": "Finance", "estimatedAnnualHours": 2000, "estimatedHourlyRate": 75 }
            ],
            "useCases": use_cases
        }))
        .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_report_pipeline() {
        let mut engine = CalcEngine::new();
        let report = assemble(
            &mut engine,
            &research(vec![use_case("a", 1_000_000.0, 4, 3.0), use_case("b", 400_000.0, 2, 6.0)]),
            &ReportSettings::default(),
        )
        .unwrap();

        assert_eq!(report.company_overview.data_maturity_factor, 0.75);
        assert!(close(report.company_overview.friction_table[0].annual_burden.value(), 150_000.0));

        // cost factor 0.90 x maturity 0.75
        let a = &report.use_cases[0];
        assert!(close(a.benefits.cost.value(), 675_000.0));
        assert!(close(a.scoring.value_score.value(), 100.0));
        assert_eq!(a.scoring.priority_tier, PriorityTier::Critical);
        assert_eq!(report.use_cases[1].scoring.priority_tier, PriorityTier::Medium);

        let dash = &report.executive_dashboard;
        // 675,000 + 270,000 floored to 100k
        assert_eq!(dash.total_annual_value.value(), 900_000.0);
        assert_eq!(dash.total_cost_benefit.value(), 900_000.0);
        assert_eq!(dash.total_monthly_tokens, 5_000_000.0);
        assert_eq!(dash.top_use_cases[0].id, "a");
        assert_eq!(dash.top_use_cases.len(), 2);
        assert!(report.fingerprint.starts_with("sha256:"));
        assert!(report.audit_trail.iter().any(|e| e.action == AuditAction::Aggregate));
    }

    #[test]
    fn test_roi_and_payback_use_exact_totals() {
        let mut engine = CalcEngine::new();
        let report = assemble(&mut engine, &research(vec![use_case("a", 1_000_000.0, 4, 3.0)]), &ReportSettings::default())
            .unwrap();
        let dash = &report.executive_dashboard;

        let total = 675_000.0;
        let ratio = engine.assumption_value(assumption_ids::IMPLEMENTATION_COST_RATIO).unwrap();
        let cost = ratio * total + dash.total_annual_token_cost.value();
        assert!(close(dash.implementation_cost, ratio * total));
        assert!(close(dash.roi.value(), (total - cost) / cost * 100.0));
        assert!(close(dash.payback_period.value(), cost / total));
        assert_eq!(dash.roi.unit(), Unit::Percent);
    }

    #[test]
    fn test_ttv_rounded_up_before_scoring() {
        let mut engine = CalcEngine::new();
        let report = assemble(
            &mut engine,
            &research(vec![use_case("a", 100.0, 3, 2.2), use_case("b", 100.0, 3, 3.0)]),
            &ReportSettings::default(),
        )
        .unwrap();
        assert_eq!(
            report.use_cases[0].scoring.ttv_score.value(),
            report.use_cases[1].scoring.ttv_score.value()
        );
        assert_eq!(report.use_cases[0].effort.time_to_value_months, 2.2);
    }

    #[test]
    fn test_ranking_tie_breaks() {
        let mut engine = CalcEngine::new();
        let report = assemble(
            &mut engine,
            &research(vec![
                use_case("c", 500_000.0, 3, 3.0),
                use_case("b", 500_000.0, 3, 3.0),
                use_case("a", 500_000.0, 3, 3.0),
            ]),
            &ReportSettings { top_n: 2, ..Default::default() },
        )
        .unwrap();
        let ids: Vec<&str> = report.executive_dashboard.top_use_cases.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(report.executive_dashboard.top_use_cases[1].rank, 2);
    }

    #[test]
    fn test_maturity_override_survives() {
        let mut engine = CalcEngine::new();
        engine.update_assumption(assumption_ids::DATA_MATURITY_FACTOR, 0.5).unwrap();
        let report = assemble(&mut engine, &research(vec![use_case("a", 1_000_000.0, 4, 3.0)]), &ReportSettings::default())
            .unwrap();
        assert_eq!(report.company_overview.data_maturity_factor, 0.5);
        assert!(close(report.use_cases[0].benefits.cost.value(), 450_000.0));
    }

    #[test]
    fn test_zero_tokens_yields_recoverable_error() {
        let mut uc = use_case("a", 1_000.0, 3, 3.0);
        uc["runsPerMonth"] = json!(0);
        let mut engine = CalcEngine::new();
        let report = assemble(&mut engine, &research(vec![uc]), &ReportSettings::default()).unwrap();
        let vpm = &report.executive_dashboard.value_per_million_tokens;
        assert_eq!(vpm.value(), 0.0);
        assert!(!vpm.is_ok());
    }
}
