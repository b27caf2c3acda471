//! Calculation service for AI research output.
//!
//! Validates research payloads, assembles calculated reports on isolated
//! engines, runs uncertainty analysis and exposes it all through the
//! [`CalcApi`] facade.

pub mod api;
pub mod error;
pub mod report;
pub mod research;
pub mod scoring;
pub mod service;
pub mod uncertainty;

pub use api::{AssumptionGroup, CalcApi, CustomEvaluation, CustomFormulaVersions};
pub use error::{Result, ServiceError};
pub use report::{CalculatedReport, ExecutiveDashboard, RankedUseCase, UseCaseResult};
pub use research::{parse_research, Research, ResearchInput};
pub use scoring::{Phase, PriorityTier};
pub use service::{apply_overrides, CalcService, EngineFactory};
pub use uncertainty::{OpportunityUncertainty, SensitivityEntry, UncertaintyReport};
