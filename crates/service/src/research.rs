//! Research payload schema.
//!
//! The AI collaborator sends loosely-typed JSON. It is decoded into
//! permissive `*Input` structs (every field optional, unknown fields
//! ignored) and then checked field by field into [`Research`]. Every problem
//! is reported with its JSON path; nothing is defaulted silently.

use std::collections::HashSet;
use std::fmt::Display;

use calcgraph_engine::{RawBenefits, TokenUsage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

// ============================================================================
// Wire shape
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchInput {
    pub company_name: Option<String>,
    pub company_overview: Option<CompanyOverviewInput>,
    #[serde(default)]
    pub friction_points: Vec<FrictionPointInput>,
    pub use_cases: Option<Vec<UseCaseInput>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyOverviewInput {
    pub position: Option<String>,
    pub industry: Option<String>,
    pub estimated_revenue: Option<f64>,
    pub estimated_employees: Option<f64>,
    pub data_maturity_level: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionPointInput {
    pub id: Option<String>,
    pub domain: Option<String>,
    pub description: Option<String>,
    pub estimated_annual_hours: Option<f64>,
    pub estimated_hourly_rate: Option<f64>,
    pub severity: Option<String>,
    pub strategic_impact: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCaseInput {
    pub id: Option<String>,
    pub name: Option<String>,
    pub function: Option<String>,
    pub sub_function: Option<String>,
    pub description: Option<String>,
    pub target_friction: Option<String>,
    pub hitl_checkpoint: Option<String>,
    #[serde(default)]
    pub ai_primitives: Vec<String>,

    pub estimated_hours_saved: Option<f64>,
    pub estimated_hourly_rate: Option<f64>,
    pub estimated_adoption_rate: Option<f64>,
    pub estimated_revenue_impact: Option<f64>,
    pub estimated_cost_impact: Option<f64>,
    pub estimated_cash_flow_impact: Option<f64>,
    pub estimated_risk_reduction: Option<f64>,

    pub data_readiness: Option<f64>,
    pub integration_complexity: Option<f64>,
    pub change_management: Option<f64>,
    pub time_to_value_months: Option<f64>,

    pub input_tokens_per_run: Option<f64>,
    pub output_tokens_per_run: Option<f64>,
    pub runs_per_month: Option<f64>,

    #[serde(default)]
    pub impact_ranges: ImpactRanges,
}

/// Optional `{low, high}` bounds around each raw driver estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactRanges {
    pub revenue: Option<ImpactRange>,
    pub cost: Option<ImpactRange>,
    pub cash_flow: Option<ImpactRange>,
    pub risk: Option<ImpactRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactRange {
    pub low: f64,
    pub high: f64,
}

// ============================================================================
// Validated shape
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Research {
    pub company_name: String,
    pub overview: CompanyOverview,
    pub friction_points: Vec<FrictionPoint>,
    pub use_cases: Vec<UseCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyOverview {
    pub position: String,
    pub industry: String,
    pub estimated_revenue: Option<f64>,
    pub estimated_employees: Option<f64>,
    pub data_maturity_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionPoint {
    pub id: Option<String>,
    pub domain: String,
    pub description: String,
    pub annual_hours: f64,
    pub hourly_rate: f64,
    pub severity: Option<Severity>,
    pub strategic_impact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effort {
    pub data_readiness: u8,
    pub integration_complexity: u8,
    pub change_management: u8,
    pub time_to_value_months: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCase {
    pub id: String,
    pub name: String,
    pub function: String,
    pub sub_function: String,
    pub description: String,
    pub target_friction: String,
    pub hitl_checkpoint: String,
    pub ai_primitives: Vec<String>,
    pub hours_saved: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub adoption_rate: Option<f64>,
    pub benefits: RawBenefits,
    pub effort: Effort,
    pub tokens: TokenUsage,
    pub impact_ranges: ImpactRanges,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Default)]
struct Checker {
    problems: Vec<String>,
}

impl Checker {
    fn fail(&mut self, path: &str, message: impl Display) {
        self.problems.push(format!("{}: {}", path, message));
    }

    fn text(&mut self, path: &str, value: Option<String>) -> String {
        match value {
            Some(v) if !v.trim().is_empty() => v,
            Some(_) => {
                self.fail(path, "must not be empty");
                String::new()
            }
            None => {
                self.fail(path, "is required");
                String::new()
            }
        }
    }

    fn amount(&mut self, path: &str, value: Option<f64>) -> f64 {
        match value {
            Some(v) => self.check_amount(path, v),
            None => {
                self.fail(path, "is required");
                0.0
            }
        }
    }

    fn optional_amount(&mut self, path: &str, value: Option<f64>) -> Option<f64> {
        value.map(|v| self.check_amount(path, v))
    }

    fn check_amount(&mut self, path: &str, v: f64) -> f64 {
        if !v.is_finite() {
            self.fail(path, "must be a finite number");
            0.0
        } else if v < 0.0 {
            self.fail(path, format_args!("must not be negative, got {}", v));
            0.0
        } else {
            v
        }
    }

    fn scale(&mut self, path: &str, value: Option<f64>) -> u8 {
        match value {
            Some(v) if v.fract() == 0.0 && (1.0..=5.0).contains(&v) => v as u8,
            Some(v) => {
                self.fail(path, format_args!("must be a whole number from 1 to 5, got {}", v));
                1
            }
            None => {
                self.fail(path, "is required");
                1
            }
        }
    }

    fn ratio(&mut self, path: &str, value: Option<f64>) -> Option<f64> {
        match value {
            Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => Some(v),
            Some(v) => {
                self.fail(path, format_args!("must be between 0 and 1, got {}", v));
                None
            }
            None => None,
        }
    }

    fn range(&mut self, path: &str, range: Option<ImpactRange>, estimate: f64) {
        let Some(r) = range else { return };
        if !(r.low.is_finite() && r.high.is_finite()) || r.low < 0.0 {
            self.fail(path, "bounds must be finite and non-negative");
        } else if !(r.low <= estimate && estimate <= r.high) {
            self.fail(path, format_args!("expected low <= {} <= high, got [{}, {}]", estimate, r.low, r.high));
        }
    }
}

impl ResearchInput {
    pub fn validate(self) -> Result<Research> {
        let mut c = Checker::default();

        let company_name = c.text("companyName", self.company_name);

        let overview = match self.company_overview {
            Some(o) => CompanyOverview {
                position: o.position.unwrap_or_default(),
                industry: o.industry.unwrap_or_default(),
                estimated_revenue: c.optional_amount("companyOverview.estimatedRevenue", o.estimated_revenue),
                estimated_employees: c.optional_amount("companyOverview.estimatedEmployees", o.estimated_employees),
                data_maturity_level: c.scale("companyOverview.dataMaturityLevel", o.data_maturity_level),
            },
            None => {
                c.fail("companyOverview", "is required");
                CompanyOverview {
                    position: String::new(),
                    industry: String::new(),
                    estimated_revenue: None,
                    estimated_employees: None,
                    data_maturity_level: 1,
                }
            }
        };

        let friction_points = self
            .friction_points
            .into_iter()
            .enumerate()
            .map(|(i, fp)| {
                let p = |field: &str| format!("frictionPoints[{}].{}", i, field);
                let severity = match fp.severity.as_deref() {
                    None => None,
                    Some("Critical") => Some(Severity::Critical),
                    Some("High") => Some(Severity::High),
                    Some("Medium") => Some(Severity::Medium),
                    Some(other) => {
                        c.fail(&p("severity"), format_args!("expected Critical, High or Medium, got '{}'", other));
                        None
                    }
                };
                FrictionPoint {
                    id: fp.id,
                    domain: c.text(&p("domain"), fp.domain),
                    description: fp.description.unwrap_or_default(),
                    annual_hours: c.amount(&p("estimatedAnnualHours"), fp.estimated_annual_hours),
                    hourly_rate: c.amount(&p("estimatedHourlyRate"), fp.estimated_hourly_rate),
                    severity,
                    strategic_impact: fp.strategic_impact.unwrap_or_default(),
                }
            })
            .collect();

        let inputs = match self.use_cases {
            Some(list) if !list.is_empty() => list,
            Some(_) => {
                c.fail("useCases", "at least one use case is required");
                Vec::new()
            }
            None => {
                c.fail("useCases", "is required");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let use_cases = inputs
            .into_iter()
            .enumerate()
            .map(|(i, uc)| {
                let p = |field: &str| format!("useCases[{}].{}", i, field);
                let id = c.text(&p("id"), uc.id);
                if !id.is_empty() && !seen.insert(id.clone()) {
                    c.fail(&p("id"), format_args!("duplicate id '{}'", id));
                }

                let benefits = RawBenefits {
                    revenue: c.amount(&p("estimatedRevenueImpact"), uc.estimated_revenue_impact),
                    cost: c.amount(&p("estimatedCostImpact"), uc.estimated_cost_impact),
                    cash_flow: c.amount(&p("estimatedCashFlowImpact"), uc.estimated_cash_flow_impact),
                    risk: c.amount(&p("estimatedRiskReduction"), uc.estimated_risk_reduction),
                };
                c.range(&p("impactRanges.revenue"), uc.impact_ranges.revenue, benefits.revenue);
                c.range(&p("impactRanges.cost"), uc.impact_ranges.cost, benefits.cost);
                c.range(&p("impactRanges.cashFlow"), uc.impact_ranges.cash_flow, benefits.cash_flow);
                c.range(&p("impactRanges.risk"), uc.impact_ranges.risk, benefits.risk);

                UseCase {
                    id,
                    name: c.text(&p("name"), uc.name),
                    function: uc.function.unwrap_or_default(),
                    sub_function: uc.sub_function.unwrap_or_default(),
                    description: uc.description.unwrap_or_default(),
                    target_friction: uc.target_friction.unwrap_or_default(),
                    hitl_checkpoint: uc.hitl_checkpoint.unwrap_or_default(),
                    ai_primitives: uc.ai_primitives,
                    hours_saved: c.optional_amount(&p("estimatedHoursSaved"), uc.estimated_hours_saved),
                    hourly_rate: c.optional_amount(&p("estimatedHourlyRate"), uc.estimated_hourly_rate),
                    adoption_rate: c.ratio(&p("estimatedAdoptionRate"), uc.estimated_adoption_rate),
                    benefits,
                    effort: Effort {
                        data_readiness: c.scale(&p("dataReadiness"), uc.data_readiness),
                        integration_complexity: c.scale(&p("integrationComplexity"), uc.integration_complexity),
                        change_management: c.scale(&p("changeManagement"), uc.change_management),
                        time_to_value_months: c.amount(&p("timeToValueMonths"), uc.time_to_value_months),
                    },
                    tokens: TokenUsage {
                        input_tokens_per_run: c.amount(&p("inputTokensPerRun"), uc.input_tokens_per_run),
                        output_tokens_per_run: c.amount(&p("outputTokensPerRun"), uc.output_tokens_per_run),
                        runs_per_month: c.amount(&p("runsPerMonth"), uc.runs_per_month),
                    },
                    impact_ranges: uc.impact_ranges,
                }
            })
            .collect();

        if !c.problems.is_empty() {
            log::warn!("rejected research payload with {} problems", c.problems.len());
            return Err(ServiceError::validation("invalid research payload", c.problems));
        }

        Ok(Research { company_name, overview, friction_points, use_cases })
    }
}

/// Decode and validate a research payload.
pub fn parse_research(value: serde_json::Value) -> Result<Research> {
    let input: ResearchInput = serde_json::from_value(value)
        .map_err(|e| ServiceError::validation("malformed research payload", vec![e.to_string()]))?;
    input.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn use_case(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Invoice matching",
            "estimatedRevenueImpact": 0,
            "estimatedCostImpact": 500000,
            "estimatedCashFlowImpact": 0,
            "estimatedRiskReduction": 0,
            "dataReadiness": 4,
            "integrationComplexity": 2,
            "changeManagement": 2,
            "timeToValueMonths": 3,
            "inputTokensPerRun": 1000,
            "outputTokensPerRun": 500,
            "runsPerMonth": 100
        })
    }

    fn payload(use_cases: Vec<serde_json::Value>) -> serde_json::Value {
        json!({
            "companyName": "Acme",
            "companyOverview": { "position": "Leader", "industry": "Manufacturing", "dataMaturityLevel": 3 },
            "useCases": use_cases,
            "strategicThemes": [{ "theme": "ignored" }]
        })
    }

    fn problems(value: serde_json::Value) -> Vec<String> {
        match parse_research(value) {
            Err(ServiceError::Validation { details, .. }) => details,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_payload() {
        let research = parse_research(payload(vec![use_case("uc-1")])).unwrap();
        assert_eq!(research.company_name, "Acme");
        assert_eq!(research.overview.data_maturity_level, 3);
        assert_eq!(research.use_cases[0].benefits.cost, 500_000.0);
        assert_eq!(research.use_cases[0].effort.data_readiness, 4);
        assert!(research.friction_points.is_empty());
    }

    #[test]
    fn test_missing_field_reports_path() {
        let mut uc = use_case("uc-1");
        uc.as_object_mut().unwrap().remove("estimatedCostImpact");
        let p = problems(payload(vec![use_case("uc-0"), use_case("uc-9"), uc]));
        assert_eq!(p, vec!["useCases[2].estimatedCostImpact: is required".to_string()]);
    }

    #[test]
    fn test_reports_every_problem() {
        let mut uc = use_case("uc-1");
        uc["dataReadiness"] = json!(7);
        uc["estimatedRevenueImpact"] = json!(-5);
        uc["estimatedAdoptionRate"] = json!(1.5);
        let p = problems(payload(vec![uc, use_case("uc-1")]));
        assert_eq!(p.len(), 4, "{:?}", p);
        assert!(p.iter().any(|m| m.starts_with("useCases[0].dataReadiness:")));
        assert!(p.iter().any(|m| m.starts_with("useCases[0].estimatedRevenueImpact:")));
        assert!(p.iter().any(|m| m.starts_with("useCases[0].estimatedAdoptionRate:")));
        assert!(p.iter().any(|m| m == "useCases[1].id: duplicate id 'uc-1'"));
    }

    #[test]
    fn test_requires_use_cases() {
        assert_eq!(problems(payload(vec![])), vec!["useCases: at least one use case is required".to_string()]);
    }

    #[test]
    fn test_fractional_scale_rejected() {
        let mut value = payload(vec![use_case("uc-1")]);
        value["companyOverview"]["dataMaturityLevel"] = json!(2.5);
        let p = problems(value);
        assert!(p[0].starts_with("companyOverview.dataMaturityLevel:"));
    }

    #[test]
    fn test_impact_range_must_contain_estimate() {
        let mut uc = use_case("uc-1");
        uc["impactRanges"] = json!({ "cost": { "low": 600000, "high": 700000 } });
        let p = problems(payload(vec![uc]));
        assert!(p[0].starts_with("useCases[0].impactRanges.cost:"));
    }

    #[test]
    fn test_friction_points_checked() {
        let mut value = payload(vec![use_case("uc-1")]);
        value["frictionPoints"] = json!([{ "domain": "Finance", "estimatedAnnualHours": 100, "severity": "Low" }]);
        let p = problems(value);
        assert!(p.contains(&"frictionPoints[0].estimatedHourlyRate: is required".to_string()));
        assert!(p.iter().any(|m| m.starts_with("frictionPoints[0].severity:")));
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let mut uc = use_case("uc-1");
        uc["estimatedCostImpact"] = json!("lots");
        match parse_research(payload(vec![uc])) {
            Err(ServiceError::Validation { message, details }) => {
                assert_eq!(message, "malformed research payload");
                assert_eq!(details.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
