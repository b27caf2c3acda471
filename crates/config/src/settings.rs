// Settings file: settings.toml in the platform config dir

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "CALCGRAPH_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloSettings {
    pub min_samples: usize,
    pub max_samples: usize,
    pub default_samples: usize,
    pub default_seed: u64,
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            min_samples: 1_000,
            max_samples: 50_000,
            default_samples: 10_000,
            default_seed: 42,
        }
    }
}

impl MonteCarloSettings {
    /// Requested sample size clamped into `[min_samples, max_samples]`.
    pub fn clamp_samples(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_samples)
            .clamp(self.min_samples, self.max_samples)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Opportunities listed in the dashboard ranking.
    pub top_n: usize,
    /// Dashboard benefit totals are rounded down to a multiple of this.
    pub benefit_rounding_increment: f64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self { top_n: 5, benefit_rounding_increment: 100_000.0 }
    }
}

/// Upper bound for `expression.max_depth`. The parser recurses once per
/// nesting level, so deeper limits risk exhausting the stack.
pub const MAX_EXPRESSION_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionSettings {
    pub max_length: usize,
    pub max_depth: usize,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self { max_length: 2_000, max_depth: 32 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// None = `formulas.db` in the platform data dir
    pub database_path: Option<PathBuf>,
}

impl StoreSettings {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("calcgraph")
                .join("formulas.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monte_carlo: MonteCarloSettings,
    pub report: ReportSettings,
    pub expression: ExpressionSettings,
    pub store: StoreSettings,
}

impl Settings {
    /// `$CALCGRAPH_CONFIG`, else `<config dir>/calcgraph/settings.toml`.
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calcgraph")
            .join("settings.toml")
    }

    /// Load settings from the default location, falling back to defaults.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    /// Strict load of an explicit file. Missing sections and keys take their
    /// defaults; unreadable, malformed or inconsistent files are errors.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mc = &self.monte_carlo;
        if mc.min_samples == 0 {
            return Err(ConfigError::Invalid("monte_carlo.min_samples must be at least 1".into()));
        }
        if mc.min_samples > mc.max_samples {
            return Err(ConfigError::Invalid(format!(
                "monte_carlo.min_samples ({}) exceeds max_samples ({})",
                mc.min_samples, mc.max_samples
            )));
        }
        if self.report.top_n == 0 {
            return Err(ConfigError::Invalid("report.top_n must be at least 1".into()));
        }
        let increment = self.report.benefit_rounding_increment;
        if !(increment.is_finite() && increment > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "report.benefit_rounding_increment must be positive, got {}",
                increment
            )));
        }
        if self.expression.max_length == 0 || self.expression.max_depth == 0 {
            return Err(ConfigError::Invalid("expression limits must be at least 1".into()));
        }
        if self.expression.max_depth > MAX_EXPRESSION_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "expression.max_depth ({}) exceeds {}",
                self.expression.max_depth, MAX_EXPRESSION_DEPTH
            )));
        }
        Ok(())
    }
}
