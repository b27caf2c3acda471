use std::sync::Arc;

use calcgraph_config::Settings;
use calcgraph_engine::{CalcEngine, FormulaRegistry};
use calcgraph_protocol::AssumptionUpdate;

use crate::error::{Result, ServiceError};
use crate::report::{self, CalculatedReport};
use crate::research::Research;
use crate::uncertainty::{self, UncertaintyReport};

/// Builds isolated engines that share one immutable formula registry.
#[derive(Debug, Clone)]
pub struct EngineFactory {
    formulas: Arc<FormulaRegistry>,
}

impl Default for EngineFactory {
    fn default() -> Self {
        Self::new(Arc::new(FormulaRegistry::standard()))
    }
}

impl EngineFactory {
    pub fn new(formulas: Arc<FormulaRegistry>) -> Self {
        Self { formulas }
    }

    pub fn formulas(&self) -> &Arc<FormulaRegistry> {
        &self.formulas
    }

    pub fn create(&self) -> CalcEngine {
        CalcEngine::with_formulas(Arc::clone(&self.formulas))
    }
}

/// Stateless calculation entry points. Every call runs on a fresh engine.
#[derive(Debug, Clone, Default)]
pub struct CalcService {
    factory: EngineFactory,
    settings: Settings,
}

impl CalcService {
    pub fn new(factory: EngineFactory, settings: Settings) -> Self {
        Self { factory, settings }
    }

    pub fn factory(&self) -> &EngineFactory {
        &self.factory
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn process_research_output(&self, research: &Research) -> Result<CalculatedReport> {
        let mut engine = self.factory.create();
        report::assemble(&mut engine, research, &self.settings.report)
    }

    /// Same pipeline with assumption overrides applied first. Either every
    /// override is valid and applied, or the call fails listing each bad one.
    pub fn recalculate_with_assumptions(
        &self,
        research: &Research,
        overrides: &[AssumptionUpdate],
    ) -> Result<CalculatedReport> {
        let mut engine = self.factory.create();
        apply_overrides(&mut engine, overrides)?;
        report::assemble(&mut engine, research, &self.settings.report)
    }

    /// Monte Carlo analysis per opportunity. The sample size is clamped to
    /// the configured bounds; the seed defaults to the configured one.
    pub fn run_uncertainty_analysis(
        &self,
        research: &Research,
        sample_size: Option<usize>,
        seed: Option<u64>,
    ) -> Result<UncertaintyReport> {
        let mc = &self.settings.monte_carlo;
        let samples = mc.clamp_samples(sample_size);
        if let Some(requested) = sample_size.filter(|n| *n != samples) {
            log::debug!("sample size {} clamped to {}", requested, samples);
        }
        let mut engine = self.factory.create();
        uncertainty::analyze(&mut engine, research, samples, seed.unwrap_or(mc.default_seed))
    }
}

/// Check every update against `engine` before applying any of them.
pub fn apply_overrides(engine: &mut CalcEngine, updates: &[AssumptionUpdate]) -> Result<()> {
    let problems = check_updates(engine, updates);
    if !problems.is_empty() {
        log::warn!("rejected {} of {} assumption updates", problems.len(), updates.len());
        return Err(ServiceError::validation(
            "invalid assumption updates",
            problems.into_iter().map(|(_, message)| message).collect(),
        ));
    }
    for update in updates {
        engine.update_assumption(&update.id, update.value)?;
    }
    Ok(())
}

/// Index and message of every update that would be rejected.
pub(crate) fn check_updates(engine: &CalcEngine, updates: &[AssumptionUpdate]) -> Vec<(usize, String)> {
    updates
        .iter()
        .enumerate()
        .filter_map(|(i, update)| {
            engine
                .assumption(&update.id)
                .and_then(|a| a.check(update.value))
                .err()
                .map(|e| (i, e.to_string()))
        })
        .collect()
}
