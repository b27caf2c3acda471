use std::sync::Arc;

use serde_json::json;

use crate::assumptions::{Assumption, AssumptionRegistry};
use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::{EngineError, EvaluationError};
use crate::formulas::{Context, FormulaRegistry, FORMULA_VERSION};
use crate::units::{self, Unit};
use crate::value::CalculatedValue;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Formula id recorded on values produced by `sum_values`.
pub const AGGREGATION_FORMULA_ID: &str = "aggregation";

/// One calculation session: an immutable formula registry, a private set of
/// assumption values and the audit log of everything done with them.
///
/// Engines are cheap to build. Each request gets its own, so nothing here is
/// shared or locked.
#[derive(Debug, Clone)]
pub struct CalcEngine {
    pub(crate) formulas: Arc<FormulaRegistry>,
    pub(crate) assumptions: AssumptionRegistry,
    pub(crate) audit: AuditLog,
}

impl Default for CalcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CalcEngine {
    pub fn new() -> Self {
        Self::with_formulas(Arc::new(FormulaRegistry::standard()))
    }

    pub fn with_formulas(formulas: Arc<FormulaRegistry>) -> Self {
        let mut engine = Self {
            formulas,
            assumptions: AssumptionRegistry::with_defaults(),
            audit: AuditLog::new(),
        };
        engine.audit.record(
            AuditAction::Initialize,
            json!({
                "engineVersion": ENGINE_VERSION,
                "formulaCount": engine.formulas.len(),
                "assumptionCount": engine.assumptions.len(),
            }),
        );
        engine
    }

    pub fn formulas(&self) -> &FormulaRegistry {
        &self.formulas
    }

    pub fn assumptions(&self) -> &AssumptionRegistry {
        &self.assumptions
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        self.audit.entries()
    }

    pub fn assumption(&self, id: &str) -> Result<&Assumption, EngineError> {
        self.assumptions
            .get(id)
            .ok_or_else(|| EngineError::UnknownAssumption(id.to_string()))
    }

    pub fn assumption_value(&self, id: &str) -> Result<f64, EngineError> {
        self.assumptions.value(id)
    }

    // ------------------------------------------------------------------------
    // Assumption edits
    // ------------------------------------------------------------------------

    pub fn update_assumption(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        match self.assumptions.update(id, value) {
            Ok(previous) => {
                self.audit.record(
                    AuditAction::UpdateAssumption,
                    json!({ "id": id, "previous": previous, "value": value }),
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("rejected assumption update: {}", e);
                Err(e)
            }
        }
    }

    pub fn reset_assumption(&mut self, id: &str) -> Result<(), EngineError> {
        self.assumptions.reset(id)?;
        let value = self.assumptions.value(id)?;
        self.audit.record(AuditAction::ResetAssumption, json!({ "id": id, "value": value }));
        Ok(())
    }

    pub fn reset_all_assumptions(&mut self) {
        let overridden: Vec<String> = self
            .assumptions
            .iter()
            .filter(|a| a.is_user_override)
            .map(|a| a.id.clone())
            .collect();
        self.assumptions.reset_all();
        self.audit.record(AuditAction::ResetAllAssumptions, json!({ "reset": overridden }));
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Evaluate a registered formula.
    ///
    /// The context seen by the formula is every assumption value keyed by
    /// assumption id, overlaid with `context`. Missing variables and
    /// non-finite results come back as a value carrying an error, not as
    /// `Err`; only an unknown formula id is an `Err`.
    pub fn evaluate_formula(&mut self, formula_id: &str, context: &Context) -> Result<CalculatedValue, EngineError> {
        let formula = self
            .formulas
            .get(formula_id)
            .ok_or_else(|| EngineError::UnknownFormula(formula_id.to_string()))?;

        let mut full = self.assumptions.formula_context();
        full.extend(context.iter().map(|(k, v)| (k.clone(), *v)));

        let snapshot: Context = formula
            .required_variables
            .iter()
            .filter_map(|v| full.get(*v).map(|value| (v.to_string(), *value)))
            .collect();

        let missing = formula.missing_variables(&full);
        let result = if !missing.is_empty() {
            log::debug!("{}: missing variables {:?}", formula.id, missing);
            CalculatedValue::failed(
                formula.output_unit,
                formula.id,
                formula.version,
                snapshot,
                EvaluationError::MissingVariables { names: missing },
            )
        } else {
            let value = formula.evaluate(&full);
            if value.is_finite() {
                CalculatedValue::computed(value, formula.output_unit, formula.id, formula.version, snapshot)
            } else {
                log::debug!("{}: non-finite result {}", formula.id, value);
                CalculatedValue::failed(formula.output_unit, formula.id, formula.version, snapshot, EvaluationError::NonFinite)
            }
        };

        self.audit.record(
            AuditAction::EvaluateFormula,
            json!({
                "formulaId": result.formula_id(),
                "version": result.formula_version(),
                "value": result.value(),
                "error": result.error().map(|e| e.to_string()),
            }),
        );
        Ok(result)
    }

    /// Sum named values into `target`, converting within a dimension.
    /// Any operand of another dimension fails the whole sum.
    pub fn sum_values(
        &mut self,
        label: &str,
        terms: &[(&str, &CalculatedValue)],
        target: Unit,
    ) -> Result<CalculatedValue, EngineError> {
        let mut total = 0.0;
        let mut snapshot = Context::new();
        let mut failed_input = None;

        for (name, value) in terms {
            let converted = units::convert(value.value(), value.unit(), target)?;
            if !value.is_ok() && failed_input.is_none() {
                failed_input = Some(name.to_string());
            }
            total += converted;
            snapshot.insert(name.to_string(), converted);
        }

        let result = match failed_input {
            Some(name) => CalculatedValue::failed(
                target,
                AGGREGATION_FORMULA_ID,
                FORMULA_VERSION,
                snapshot,
                EvaluationError::InvalidInput { name },
            ),
            None => CalculatedValue::computed(total, target, AGGREGATION_FORMULA_ID, FORMULA_VERSION, snapshot),
        };

        self.audit.record(
            AuditAction::Aggregate,
            json!({ "label": label, "terms": terms.len(), "unit": target, "value": result.value() }),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::ids as assumption_ids;
    use crate::formulas::{ids, vars};

    fn ctx(pairs: &[(&str, f64)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_new_engine_logs_initialize() {
        let engine = CalcEngine::new();
        assert_eq!(engine.audit_log().len(), 1);
        assert_eq!(engine.audit_log()[0].action, AuditAction::Initialize);
    }

    #[test]
    fn test_evaluate_wraps_unit_and_snapshot() {
        let mut engine = CalcEngine::new();
        let v = engine
            .evaluate_formula(
                ids::DRIVER_BENEFIT,
                &ctx(&[
                    (vars::BASE_BENEFIT, 1_000_000.0),
                    (vars::CONSERVATIVE_FACTOR, 0.9),
                    (vars::DATA_MATURITY_FACTOR, 0.75),
                    ("unrelated", 5.0),
                ]),
            )
            .unwrap();
        assert!((v.value() - 675_000.0).abs() < 1e-6);
        assert_eq!(v.unit(), Unit::UsdPerYear);
        assert_eq!(v.formula_id(), ids::DRIVER_BENEFIT);
        assert_eq!(v.inputs_snapshot().len(), 3);
        assert!(!v.inputs_snapshot().contains_key("unrelated"));
        assert_eq!(engine.audit.count(AuditAction::EvaluateFormula), 1);
    }

    #[test]
    fn test_missing_variables_are_recoverable() {
        let mut engine = CalcEngine::new();
        let v = engine
            .evaluate_formula(ids::DRIVER_BENEFIT, &ctx(&[(vars::CONSERVATIVE_FACTOR, 0.9)]))
            .unwrap();
        assert_eq!(v.value(), 0.0);
        assert_eq!(
            v.error(),
            Some(&EvaluationError::MissingVariables {
                names: vec![vars::BASE_BENEFIT.into()]
            })
        );
        assert_eq!(engine.audit.count(AuditAction::EvaluateFormula), 1);
    }

    #[test]
    fn test_non_finite_is_recoverable() {
        let mut engine = CalcEngine::new();
        let v = engine
            .evaluate_formula(ids::PAYBACK_PERIOD, &ctx(&[(vars::INITIAL_INVESTMENT, 10.0), (vars::ANNUAL_BENEFIT, 0.0)]))
            .unwrap();
        assert_eq!(v.value(), 0.0);
        assert_eq!(v.error(), Some(&EvaluationError::NonFinite));
    }

    #[test]
    fn test_unknown_formula_is_err() {
        let mut engine = CalcEngine::new();
        assert_eq!(
            engine.evaluate_formula("nope", &Context::new()),
            Err(EngineError::UnknownFormula("nope".into()))
        );
    }

    #[test]
    fn test_call_context_overrides_assumptions() {
        let mut engine = CalcEngine::new();
        let v = engine
            .evaluate_formula(ids::TOKEN_COST_ANNUAL, &ctx(&[(vars::MONTHLY_COST, 2.0)]))
            .unwrap();
        assert_eq!(v.value(), 24.0);
    }

    #[test]
    fn test_assumptions_fill_formula_variables() {
        let mut engine = CalcEngine::new();
        let scores = ctx(&[(vars::VALUE_SCORE, 80.0), (vars::TTV_SCORE, 50.0), (vars::EFFORT_SCORE, 20.0)]);
        let v = engine.evaluate_formula(ids::PRIORITY_SCORE, &scores).unwrap();
        assert!(v.is_ok());
        assert!((v.value() - 71.0).abs() < 1e-9);
        assert_eq!(v.inputs_snapshot().get(vars::VALUE_WEIGHT), Some(&40.0));

        engine.update_assumption(assumption_ids::VALUE_WEIGHT, 60.0).unwrap();
        engine.update_assumption(assumption_ids::TTV_WEIGHT, 20.0).unwrap();
        engine.update_assumption(assumption_ids::EFFORT_WEIGHT, 20.0).unwrap();
        let v = engine.evaluate_formula(ids::PRIORITY_SCORE, &scores).unwrap();
        assert!((v.value() - 74.0).abs() < 1e-9);

        let mut pinned = scores.clone();
        pinned.insert(vars::VALUE_WEIGHT.to_string(), 100.0);
        pinned.insert(vars::TTV_WEIGHT.to_string(), 0.0);
        pinned.insert(vars::EFFORT_WEIGHT.to_string(), 0.0);
        let v = engine.evaluate_formula(ids::PRIORITY_SCORE, &pinned).unwrap();
        assert!((v.value() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_determinism() {
        let mut engine = CalcEngine::new();
        let context = ctx(&[
            (vars::VALUE_SCORE, 73.3),
            (vars::TTV_SCORE, 41.7),
            (vars::EFFORT_SCORE, 55.1),
            (vars::VALUE_WEIGHT, 40.0),
            (vars::TTV_WEIGHT, 30.0),
            (vars::EFFORT_WEIGHT, 30.0),
        ]);
        let first = engine.evaluate_formula(ids::PRIORITY_SCORE, &context).unwrap().value();
        for _ in 0..1_000 {
            let again = engine.evaluate_formula(ids::PRIORITY_SCORE, &context).unwrap().value();
            assert_eq!(again.to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_update_and_reset_are_audited() {
        let mut engine = CalcEngine::new();
        engine.update_assumption(assumption_ids::ADOPTION_RATE, 0.6).unwrap();
        assert!(engine.update_assumption(assumption_ids::ADOPTION_RATE, 0.1).is_err());
        engine.reset_assumption(assumption_ids::ADOPTION_RATE).unwrap();
        engine.reset_all_assumptions();

        let actions: Vec<_> = engine.audit_log().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Initialize,
                AuditAction::UpdateAssumption,
                AuditAction::ResetAssumption,
                AuditAction::ResetAllAssumptions,
            ]
        );
    }

    #[test]
    fn test_sum_values_converts_within_dimension() {
        let mut engine = CalcEngine::new();
        let monthly = engine
            .evaluate_formula(
                ids::TOKEN_COST_MONTHLY,
                &ctx(&[
                    (vars::INPUT_TOKENS, 1_000_000.0),
                    (vars::OUTPUT_TOKENS, 500_000.0),
                    (vars::INPUT_PRICE, 3.0),
                    (vars::OUTPUT_PRICE, 15.0),
                ]),
            )
            .unwrap();
        let annual = engine.evaluate_formula(ids::TOKEN_COST_ANNUAL, &ctx(&[(vars::MONTHLY_COST, 1.0)])).unwrap();

        let sum = engine
            .sum_values("token costs", &[("a", &monthly), ("b", &annual)], Unit::UsdPerYear)
            .unwrap();
        assert!((sum.value() - (126.0 + 12.0)).abs() < 1e-9);
        assert_eq!(sum.formula_id(), AGGREGATION_FORMULA_ID);
    }

    #[test]
    fn test_sum_values_rejects_mixed_dimensions() {
        let mut engine = CalcEngine::new();
        let money = engine.evaluate_formula(ids::TOKEN_COST_ANNUAL, &ctx(&[(vars::MONTHLY_COST, 1.0)])).unwrap();
        let score = engine.evaluate_formula(ids::TTV_SCORE, &ctx(&[(vars::TIME_TO_VALUE_MONTHS, 1.0)])).unwrap();
        let err = engine
            .sum_values("bad", &[("money", &money), ("score", &score)], Unit::UsdPerYear)
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_sum_values_propagates_failed_inputs() {
        let mut engine = CalcEngine::new();
        let bad = engine.evaluate_formula(ids::TOKEN_COST_ANNUAL, &Context::new()).unwrap();
        let sum = engine.sum_values("total", &[("bad", &bad)], Unit::UsdPerYear).unwrap();
        assert_eq!(sum.error(), Some(&EvaluationError::InvalidInput { name: "bad".into() }));
    }
}
