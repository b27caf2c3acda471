//! In-process API facade.
//!
//! `CalcApi` owns the long-lived assumption browsing engine and the custom
//! formula store, and answers every call with an [`ApiResponse`]. Report
//! calculations never touch the browsing engine: they run on fresh engines
//! from the service's factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use calcgraph_config::Settings;
use calcgraph_engine::{
    Assumption, AssumptionCategory, AuditEntry, CalcEngine, CheckpointInput, EngineError, EngineState,
    FormulaSummary, ENGINE_VERSION,
};
use calcgraph_expr::{Evaluation, InputField, Limits};
use calcgraph_protocol::{
    ApiError, ApiResponse, AssumptionUpdate, BatchItemResult, BatchUpdateResult, HealthStatus, PreviewRequest,
    UncertaintyOptions, PROTOCOL_VERSION,
};
use calcgraph_store::{CustomFormula, FormulaKey, FormulaStore, NewCustomFormula};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::report::CalculatedReport;
use crate::research::parse_research;
use crate::service::{check_updates, CalcService, EngineFactory};
use crate::uncertainty::UncertaintyReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssumptionGroup {
    pub category: AssumptionCategory,
    pub label: String,
    pub assumptions: Vec<Assumption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFormulaVersions {
    pub versions: Vec<CustomFormula>,
    pub active: Option<CustomFormula>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvaluation {
    pub formula_id: String,
    pub version: u32,
    pub evaluation: Evaluation,
}

fn expression_limits(settings: &Settings) -> Limits {
    Limits {
        max_length: settings.expression.max_length,
        max_depth: settings.expression.max_depth,
    }
}

fn respond<T>(result: Result<T>) -> ApiResponse<T> {
    result.map_err(ApiError::from).into()
}

pub struct CalcApi {
    service: CalcService,
    browsing: Arc<Mutex<CalcEngine>>,
    store: Mutex<FormulaStore>,
}

impl CalcApi {
    pub fn new(service: CalcService, browsing: Arc<Mutex<CalcEngine>>, store: FormulaStore) -> Self {
        Self { service, browsing, store: Mutex::new(store) }
    }

    /// Standard formulas, a fresh browsing engine and the store at the
    /// configured database path.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let path = settings.store.resolved_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ServiceError::Internal(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        let store = FormulaStore::open(&path)?;
        log::info!("custom formulas at {}", path.display());
        Ok(Self::with_store(settings, store))
    }

    /// Like `from_settings` with an in-memory store.
    pub fn in_memory(settings: Settings) -> Result<Self> {
        Ok(Self::with_store(settings, FormulaStore::open_in_memory()?))
    }

    fn with_store(settings: Settings, store: FormulaStore) -> Self {
        let limits = expression_limits(&settings);
        let factory = EngineFactory::default();
        let browsing = Arc::new(Mutex::new(factory.create()));
        Self::new(CalcService::new(factory, settings), browsing, store.with_limits(limits))
    }

    pub fn service(&self) -> &CalcService {
        &self.service
    }

    pub fn browsing_engine(&self) -> Arc<Mutex<CalcEngine>> {
        Arc::clone(&self.browsing)
    }

    fn limits(&self) -> Limits {
        expression_limits(self.service.settings())
    }

    // ------------------------------------------------------------------------
    // Assumptions
    // ------------------------------------------------------------------------

    pub fn list_assumptions(&self) -> ApiResponse<Vec<Assumption>> {
        ApiResponse::ok(self.browsing.lock().assumptions().iter().cloned().collect())
    }

    pub fn assumptions_by_category(&self) -> ApiResponse<Vec<AssumptionGroup>> {
        let engine = self.browsing.lock();
        let groups = engine
            .assumptions()
            .by_category()
            .into_iter()
            .map(|(category, assumptions)| AssumptionGroup {
                category,
                label: category.label().to_string(),
                assumptions: assumptions.into_iter().cloned().collect(),
            })
            .collect();
        ApiResponse::ok(groups)
    }

    pub fn update_assumption(&self, update: &AssumptionUpdate) -> ApiResponse<Assumption> {
        let mut engine = self.browsing.lock();
        respond(
            engine
                .update_assumption(&update.id, update.value)
                .and_then(|()| engine.assumption(&update.id).cloned())
                .map_err(ServiceError::from),
        )
    }

    /// Apply every update or none. On rejection the response carries both the
    /// error and a per-item result list.
    pub fn batch_update(&self, updates: &[AssumptionUpdate]) -> ApiResponse<BatchUpdateResult> {
        let mut engine = self.browsing.lock();
        let problems: BTreeMap<usize, String> = check_updates(&engine, updates).into_iter().collect();

        let results: Vec<BatchItemResult> = updates
            .iter()
            .enumerate()
            .map(|(i, u)| BatchItemResult {
                id: u.id.clone(),
                success: !problems.contains_key(&i),
                error: problems.get(&i).cloned(),
            })
            .collect();

        if !problems.is_empty() {
            log::warn!("batch update rejected: {} of {} invalid", problems.len(), updates.len());
            let error = ApiError::from(ServiceError::validation(
                "batch update rejected; no assumptions were changed",
                problems.into_values().collect(),
            ));
            return ApiResponse {
                success: false,
                data: Some(BatchUpdateResult { applied: 0, results }),
                error: Some(error),
            };
        }

        for update in updates {
            if let Err(e) = engine.update_assumption(&update.id, update.value) {
                return ApiResponse::err(ServiceError::Internal(format!("checked update failed: {}", e)).into());
            }
        }
        ApiResponse::ok(BatchUpdateResult { applied: updates.len(), results })
    }

    pub fn reset_assumption(&self, id: &str) -> ApiResponse<Assumption> {
        let mut engine = self.browsing.lock();
        respond(
            engine
                .reset_assumption(id)
                .and_then(|()| engine.assumption(id).cloned())
                .map_err(ServiceError::from),
        )
    }

    pub fn reset_all_assumptions(&self) -> ApiResponse<Vec<Assumption>> {
        let mut engine = self.browsing.lock();
        engine.reset_all_assumptions();
        ApiResponse::ok(engine.assumptions().iter().cloned().collect())
    }

    // ------------------------------------------------------------------------
    // Formulas
    // ------------------------------------------------------------------------

    pub fn list_formulas(&self) -> ApiResponse<Vec<FormulaSummary>> {
        ApiResponse::ok(self.service.factory().formulas().iter().map(FormulaSummary::from).collect())
    }

    pub fn get_formula(&self, id: &str) -> ApiResponse<FormulaSummary> {
        respond(
            self.service
                .factory()
                .formulas()
                .get(id)
                .map(FormulaSummary::from)
                .ok_or_else(|| EngineError::UnknownFormula(id.to_string()).into()),
        )
    }

    // ------------------------------------------------------------------------
    // Calculation
    // ------------------------------------------------------------------------

    pub fn calculate(&self, research: serde_json::Value) -> ApiResponse<CalculatedReport> {
        respond(parse_research(research).and_then(|r| self.service.process_research_output(&r)))
    }

    pub fn recalculate(&self, research: serde_json::Value, overrides: &[AssumptionUpdate]) -> ApiResponse<CalculatedReport> {
        respond(parse_research(research).and_then(|r| self.service.recalculate_with_assumptions(&r, overrides)))
    }

    pub fn uncertainty(&self, research: serde_json::Value, options: &UncertaintyOptions) -> ApiResponse<UncertaintyReport> {
        respond(
            parse_research(research)
                .and_then(|r| self.service.run_uncertainty_analysis(&r, options.sample_size, options.seed)),
        )
    }

    // ------------------------------------------------------------------------
    // Audit and state
    // ------------------------------------------------------------------------

    pub fn export_state(&self) -> ApiResponse<EngineState> {
        ApiResponse::ok(self.browsing.lock().export_state())
    }

    /// Restore a checkpoint into a fresh engine and swap it in as the
    /// browsing engine. The current engine is untouched on failure.
    pub fn import_state(&self, checkpoint: CheckpointInput) -> ApiResponse<EngineState> {
        let formulas = Arc::clone(self.service.factory().formulas());
        respond(
            CalcEngine::from_checkpoint(formulas, checkpoint)
                .map(|engine| {
                    let state = engine.export_state();
                    *self.browsing.lock() = engine;
                    state
                })
                .map_err(ServiceError::from),
        )
    }

    pub fn audit_log(&self) -> ApiResponse<Vec<AuditEntry>> {
        ApiResponse::ok(self.browsing.lock().audit_log().to_vec())
    }

    pub fn health(&self) -> ApiResponse<HealthStatus> {
        let engine = self.browsing.lock();
        ApiResponse::ok(HealthStatus {
            status: "ok".to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            protocol_version: PROTOCOL_VERSION,
            formula_count: engine.formulas().len(),
            assumption_count: engine.assumptions().len(),
            audit_entries: engine.audit_log().len(),
        })
    }

    // ------------------------------------------------------------------------
    // Custom formulas
    // ------------------------------------------------------------------------

    pub fn list_custom_formulas(&self, key: &FormulaKey) -> ApiResponse<CustomFormulaVersions> {
        let store = self.store.lock();
        let listed = store
            .list_versions(key)
            .and_then(|versions| Ok(CustomFormulaVersions { versions, active: store.active(key)? }));
        respond(listed.map_err(ServiceError::from))
    }

    pub fn create_custom_formula(&self, new: NewCustomFormula) -> ApiResponse<CustomFormula> {
        respond(self.store.lock().create_version(new).map_err(ServiceError::from))
    }

    pub fn activate_custom_formula(&self, id: &str) -> ApiResponse<CustomFormula> {
        respond(self.store.lock().activate(id).map_err(ServiceError::from))
    }

    pub fn preview_formula(&self, request: &PreviewRequest) -> ApiResponse<Evaluation> {
        ApiResponse::ok(calcgraph_expr::preview(
            &request.expression,
            &request.context,
            &request.constants,
            &self.limits(),
        ))
    }

    /// Evaluate the active version for `key` against `context`.
    pub fn evaluate_custom_formula(&self, key: &FormulaKey, context: &BTreeMap<String, f64>) -> ApiResponse<CustomEvaluation> {
        let active = self.store.lock().active(key);
        respond(active.map_err(ServiceError::from).and_then(|formula| {
            let formula = formula.ok_or_else(|| {
                ServiceError::NotFound(format!("no active custom formula for field '{}'", key.field_key))
            })?;
            let evaluation = calcgraph_expr::preview(&formula.expression, context, &formula.constants, &self.limits());
            Ok(CustomEvaluation { formula_id: formula.id.to_string(), version: formula.version, evaluation })
        }))
    }

    pub fn list_available_inputs(&self) -> ApiResponse<BTreeMap<&'static str, Vec<InputField>>> {
        ApiResponse::ok(calcgraph_expr::inputs_by_category())
    }
}
