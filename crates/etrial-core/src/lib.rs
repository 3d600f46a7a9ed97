//! eTrial core library
//!
//! Orchestration layer for therapeutic-candidate screening: the candidate
//! and result model, threshold resolution, the audit trail and the
//! per-candidate validation pipeline with critical-module gating.
//!
//! ## Key Components
//!
//! - `ValidationPipeline`: registers modules and validates one candidate
//! - `ThresholdManager`: metric value → decision tier, module → overall rule
//! - `AuditTrail`: append-only reproducibility record behind an `AuditStore`
//! - `ValidationModule`: the async contract scoring modules implement

pub mod audit;
pub mod config;
pub mod digest;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod metrics;
pub mod module;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod telemetry;
pub mod thresholds;

pub use audit::{
    AuditEntry, AuditEvent, AuditOptions, AuditRecord, AuditStore, AuditTrail,
    EnvironmentSnapshot, EventKind, FsAuditStore, ReproducibilityReport,
};
pub use config::{normalize_module_name, AuditSettings, EtrialConfig, GlobalSettings};
pub use domain::{
    reduce_metric_decisions, Candidate, CandidateHash, Decision, MetricResult, MetricValue,
    Modality, PipelineResult, TierRule, TierThresholds, ValidationResult,
};
pub use error::{AuditError, ConfigError, ModuleError, PipelineError, Result};
pub use module::{ConfigurableModule, RegisterOptions, ValidationModule};
pub use pipeline::{
    fallback_overall_decision, ValidateOptions, ValidationPipeline, ValidationPipelineBuilder,
    DEFAULT_CRITICAL_MODULES,
};
pub use report::{DossierRenderer, JsonDossierRenderer, MarkdownDossierRenderer, ReportFormat};
pub use thresholds::ThresholdManager;
