//! Monte Carlo propagation of uncertain inputs through a registered formula.
//!
//! Samples are drawn sequentially from a seeded `StdRng` so a given seed
//! always produces the same draws. Only the formula evaluation is spread
//! across threads, and `collect` keeps sample order, so results are
//! reproducible regardless of thread count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::assumptions::SourceReference;
use crate::audit::AuditAction;
use crate::engine::CalcEngine;
use crate::error::EngineError;
use crate::formulas::Context;
use crate::units::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Triangular,
    /// Mean at `mode`, standard deviation a quarter of `high - low`. Not
    /// truncated, so draws may fall outside the range.
    Normal,
    Uniform,
    /// Beta-PERT with shape 4.
    Pert,
    /// Always `mode`.
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertainVariable {
    pub id: String,
    pub label: String,
    pub distribution: Distribution,
    pub low: f64,
    pub mode: f64,
    pub high: f64,
    pub unit: Unit,
    pub confidence_level: ConfidenceLevel,
    #[serde(default)]
    pub sources: Vec<SourceReference>,
}

impl UncertainVariable {
    pub fn triangular(id: &str, low: f64, mode: f64, high: f64, unit: Unit) -> Self {
        Self {
            id: id.to_string(),
            label: id.to_string(),
            distribution: Distribution::Triangular,
            low,
            mode,
            high,
            unit,
            confidence_level: ConfidenceLevel::default(),
            sources: Vec::new(),
        }
    }

    /// Uniform over `[low, high]`; `mode` is recorded as the midpoint.
    pub fn uniform(id: &str, low: f64, high: f64, unit: Unit) -> Self {
        Self {
            distribution: Distribution::Uniform,
            ..Self::triangular(id, low, (low + high) / 2.0, high, unit)
        }
    }

    pub fn normal(id: &str, low: f64, mode: f64, high: f64, unit: Unit) -> Self {
        Self { distribution: Distribution::Normal, ..Self::triangular(id, low, mode, high, unit) }
    }

    pub fn pert(id: &str, low: f64, mode: f64, high: f64, unit: Unit) -> Self {
        Self { distribution: Distribution::Pert, ..Self::triangular(id, low, mode, high, unit) }
    }

    /// A known value carried through the simulation unchanged.
    pub fn point(id: &str, value: f64, unit: Unit) -> Self {
        Self { distribution: Distribution::Point, ..Self::triangular(id, value, value, value, unit) }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_confidence(mut self, level: ConfidenceLevel) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidVariable { id: self.id.clone(), reason: reason.to_string() };
        if !(self.low.is_finite() && self.mode.is_finite() && self.high.is_finite()) {
            return Err(invalid("bounds must be finite"));
        }
        if self.low > self.mode || self.mode > self.high {
            return Err(invalid("expected low <= mode <= high"));
        }
        Ok(())
    }

    /// Relative width of the range around the mode, in percent. Zero when the
    /// mode is zero.
    pub fn spread_percent(&self) -> f64 {
        if self.mode == 0.0 {
            0.0
        } else {
            (self.high - self.low) / self.mode.abs() * 100.0
        }
    }
}

const PERT_SHAPE: f64 = 4.0;

/// Relative standard error of the mean below which a run counts as converged.
pub const CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Draw `n` samples from `variable`'s distribution.
pub fn sample_distribution<R: Rng + ?Sized>(variable: &UncertainVariable, n: usize, rng: &mut R) -> Vec<f64> {
    (0..n).map(|_| sample_one(variable, rng)).collect()
}

fn sample_one<R: Rng + ?Sized>(variable: &UncertainVariable, rng: &mut R) -> f64 {
    let (low, mode, high) = (variable.low, variable.mode, variable.high);
    let range = high - low;
    if range == 0.0 || variable.distribution == Distribution::Point {
        return mode;
    }

    match variable.distribution {
        Distribution::Uniform => low + rng.gen::<f64>() * range,
        Distribution::Triangular => {
            let u: f64 = rng.gen();
            let fc = (mode - low) / range;
            if u < fc {
                low + (u * range * (mode - low)).sqrt()
            } else {
                high - ((1.0 - u) * range * (high - mode)).sqrt()
            }
        }
        Distribution::Normal => mode + standard_normal(rng) * range / 4.0,
        Distribution::Pert => {
            let alpha = 1.0 + PERT_SHAPE * (mode - low) / range;
            let beta = 1.0 + PERT_SHAPE * (high - mode) / range;
            let a = sample_gamma(alpha, rng);
            let b = sample_gamma(beta, rng);
            low + a / (a + b) * range
        }
        Distribution::Point => mode,
    }
}

// Box-Muller. `1 - u` keeps the log argument in (0, 1].
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// Marsaglia-Tsang; shapes below 1 are boosted by one and scaled back down.
fn sample_gamma<R: Rng + ?Sized>(shape: f64, rng: &mut R) -> f64 {
    if shape < 1.0 {
        let u = 1.0 - rng.gen::<f64>();
        return sample_gamma(shape + 1.0, rng) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let (x, v) = loop {
            let x = standard_normal(rng);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v * v * v);
            }
        };
        let u = 1.0 - rng.gen::<f64>();
        if u < 1.0 - 0.0331 * x.powi(4) || u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub sample_size: usize,
    pub p10: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub mean: f64,
    pub standard_deviation: f64,
    /// Standard error of the mean is under 1% of the mean.
    pub convergence_achieved: bool,
    pub failed_samples: usize,
    pub seed: u64,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let index = ((p * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Summarize finite samples. `samples` is sorted in place.
pub fn summarize(samples: &mut [f64], failed_samples: usize, seed: u64) -> Result<MonteCarloResult, EngineError> {
    if samples.is_empty() {
        return Err(EngineError::NoValidSamples(failed_samples));
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let standard_deviation = variance.sqrt();
    let standard_error = standard_deviation / n.sqrt();

    Ok(MonteCarloResult {
        sample_size: samples.len(),
        p10: percentile(samples, 0.10),
        p25: percentile(samples, 0.25),
        median: percentile(samples, 0.50),
        p75: percentile(samples, 0.75),
        p90: percentile(samples, 0.90),
        mean,
        standard_deviation,
        convergence_achieved: standard_error == 0.0 || standard_error / mean.abs() < CONVERGENCE_THRESHOLD,
        failed_samples,
        seed,
    })
}

impl CalcEngine {
    /// Propagate `variables` through `formula_id`.
    ///
    /// Each sample's context is the assumption values, then `fixed`, then the
    /// sampled variables keyed by their ids. Non-finite results are counted in
    /// `failed_samples` and left out of the statistics.
    pub fn run_monte_carlo(
        &mut self,
        variables: &[UncertainVariable],
        formula_id: &str,
        sample_size: usize,
        seed: u64,
        fixed: &Context,
    ) -> Result<MonteCarloResult, EngineError> {
        if sample_size == 0 {
            return Err(EngineError::EmptySample);
        }
        for variable in variables {
            variable.validate()?;
        }
        let formula = self
            .formulas
            .get(formula_id)
            .ok_or_else(|| EngineError::UnknownFormula(formula_id.to_string()))?;

        let mut base = self.assumptions.formula_context();
        base.extend(fixed.iter().map(|(k, v)| (k.clone(), *v)));

        let mut rng = StdRng::seed_from_u64(seed);
        let draws: Vec<Vec<f64>> = variables
            .iter()
            .map(|v| sample_distribution(v, sample_size, &mut rng))
            .collect();

        let outputs: Vec<f64> = (0..sample_size)
            .into_par_iter()
            .map(|i| {
                let mut context = base.clone();
                for (variable, samples) in variables.iter().zip(&draws) {
                    context.insert(variable.id.clone(), samples[i]);
                }
                formula.evaluate(&context)
            })
            .collect();

        let (mut finite, failed): (Vec<f64>, Vec<f64>) = outputs.into_iter().partition(|v| v.is_finite());
        let result = summarize(&mut finite, failed.len(), seed);

        self.audit.record(
            AuditAction::MonteCarlo,
            json!({
                "formulaId": formula_id,
                "variables": variables.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
                "sampleSize": sample_size,
                "seed": seed,
                "failedSamples": failed.len(),
                "mean": result.as_ref().ok().map(|r| r.mean),
            }),
        );
        if !failed.is_empty() {
            log::warn!("monte carlo {}: {} of {} samples were not finite", formula_id, failed.len(), sample_size);
        }
        result
    }
}
