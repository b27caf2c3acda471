// Configuration loading

pub mod settings;

pub use settings::{
    ConfigError, ExpressionSettings, MonteCarloSettings, ReportSettings, Settings, StoreSettings, MAX_EXPRESSION_DEPTH,
};
