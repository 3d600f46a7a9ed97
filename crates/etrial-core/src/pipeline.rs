//! Per-candidate validation: module registry, sequential execution with
//! critical-module gating, decision aggregation and audit recording.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn, Instrument};

use crate::audit::{AuditEvent, AuditTrail, EventKind};
use crate::config::{normalize_module_name, EtrialConfig};
use crate::domain::{Candidate, CandidateHash, Decision, PipelineResult, ValidationResult};
use crate::error::{ConfigError, ModuleError, PipelineError, Result};
use crate::metrics::METRICS;
use crate::module::{ConfigurableModule, RegisterOptions, ValidationModule};
use crate::obs;
use crate::report::{self, DossierRenderer, JsonDossierRenderer, ReportFormat};
use crate::thresholds::ThresholdManager;

/// Modules whose KILL stops the run when no threshold tree is configured.
pub const DEFAULT_CRITICAL_MODULES: [&str; 3] = ["structure", "specificity", "safety"];

/// Without a threshold tree, this many REVISE modules escalate to KILL.
pub const FALLBACK_REVISE_KILL_COUNT: usize = 4;

/// File looked up next to the pipeline config by
/// [`ValidationPipeline::from_config_path`].
pub const THRESHOLDS_FILE_NAME: &str = "thresholds.yaml";

/// Overall decision used when no threshold tree is configured.
pub fn fallback_overall_decision<I>(decisions: I) -> Decision
where
    I: IntoIterator<Item = Decision>,
{
    let mut revise_count = 0usize;
    for decision in decisions {
        match decision {
            Decision::Kill => return Decision::Kill,
            Decision::Revise => revise_count += 1,
            Decision::Pass | Decision::Informative => {}
        }
    }
    if revise_count >= FALLBACK_REVISE_KILL_COUNT {
        Decision::Kill
    } else if revise_count > 0 {
        Decision::Revise
    } else {
        Decision::Pass
    }
}

/// Per-call options for [`ValidationPipeline::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Subset of registered modules to run, in the given order. Unknown
    /// names are ignored.
    pub modules: Option<Vec<String>>,
    /// Override the pipeline's gating default for this call.
    pub stop_on_kill: Option<bool>,
}

impl ValidateOptions {
    pub fn modules<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: Some(names.into_iter().map(Into::into).collect()),
            stop_on_kill: None,
        }
    }

    pub fn without_gating() -> Self {
        Self {
            modules: None,
            stop_on_kill: Some(false),
        }
    }

    pub fn stop_on_kill(mut self, stop: bool) -> Self {
        self.stop_on_kill = Some(stop);
        self
    }
}

pub struct ValidationPipelineBuilder {
    config: Arc<EtrialConfig>,
    thresholds: Option<Arc<ThresholdManager>>,
    audit: Option<Arc<AuditTrail>>,
    stop_on_kill: bool,
    module_timeout: Option<Duration>,
}

impl ValidationPipelineBuilder {
    pub fn thresholds(mut self, thresholds: ThresholdManager) -> Self {
        self.thresholds = Some(Arc::new(thresholds));
        self
    }

    pub fn shared_thresholds(mut self, thresholds: Arc<ThresholdManager>) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Use this trail instead of a filesystem trail under the configured
    /// audit directory.
    pub fn audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Gating default for calls that do not override it. On by default.
    pub fn stop_on_kill(mut self, stop: bool) -> Self {
        self.stop_on_kill = stop;
        self
    }

    pub fn module_timeout(mut self, timeout: Duration) -> Self {
        self.module_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<ValidationPipeline> {
        let audit = match self.audit {
            Some(audit) => audit,
            None => Arc::new(AuditTrail::from_config(&self.config)?),
        };

        let config_hash = self.config.config_hash();
        audit.set_config_hash(&config_hash).await;

        info!(
            config_hash = %config_hash,
            thresholds = self.thresholds.is_some(),
            trail_id = %audit.trail_id(),
            "validation pipeline initialized"
        );

        Ok(ValidationPipeline {
            config: self.config,
            thresholds: self.thresholds,
            audit,
            modules: HashMap::new(),
            order: Vec::new(),
            renderers: HashMap::new(),
            stop_on_kill: self.stop_on_kill,
            module_timeout: self.module_timeout,
            config_hash,
        })
    }
}

/// Runs registered modules against one candidate at a time.
///
/// Registration takes `&mut self`; once built and registered the pipeline
/// is shared (`Arc`) and `validate` may be called concurrently.
pub struct ValidationPipeline {
    config: Arc<EtrialConfig>,
    thresholds: Option<Arc<ThresholdManager>>,
    audit: Arc<AuditTrail>,
    modules: HashMap<String, Arc<dyn ValidationModule>>,
    order: Vec<String>,
    renderers: HashMap<ReportFormat, Arc<dyn DossierRenderer>>,
    stop_on_kill: bool,
    module_timeout: Option<Duration>,
    config_hash: String,
}

impl std::fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("modules", &self.order)
            .field("config_hash", &self.config_hash)
            .field("thresholds", &self.thresholds.is_some())
            .field("stop_on_kill", &self.stop_on_kill)
            .finish_non_exhaustive()
    }
}

impl ValidationPipeline {
    pub fn builder(config: impl Into<Arc<EtrialConfig>>) -> ValidationPipelineBuilder {
        let config = config.into();
        ValidationPipelineBuilder {
            module_timeout: config.module_timeout(),
            config,
            thresholds: None,
            audit: None,
            stop_on_kill: true,
        }
    }

    /// Load the YAML config at `path` and, when present, the sibling
    /// `thresholds.yaml`. The audit trail goes to the configured directory.
    pub async fn from_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = EtrialConfig::from_yaml_path(path)?;

        let thresholds_path = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(THRESHOLDS_FILE_NAME);
        let mut builder = Self::builder(config);
        if thresholds_path.is_file() {
            builder = builder.thresholds(ThresholdManager::load(&thresholds_path)?);
        }
        builder.build().await
    }

    /// Register a module instance. Returns `false` when the module is
    /// disabled in config and was skipped.
    ///
    /// Re-registering a name replaces the module and keeps its slot unless
    /// an explicit position is given.
    pub async fn register_module(
        &mut self,
        module: Arc<dyn ValidationModule>,
        options: RegisterOptions,
    ) -> bool {
        let name = options
            .name
            .unwrap_or_else(|| module.name().to_string());

        if !self.config.is_module_enabled(&name) {
            info!(module = %name, "module disabled in config; skipping registration");
            return false;
        }

        let version = module.version().to_string();
        let replaced = self.modules.insert(name.clone(), module).is_some();

        match (replaced, options.position) {
            (true, None) => {}
            (true, Some(position)) => {
                self.order.retain(|n| n != &name);
                let position = position.min(self.order.len());
                self.order.insert(position, name.clone());
            }
            (false, Some(position)) => {
                let position = position.min(self.order.len());
                self.order.insert(position, name.clone());
            }
            (false, None) => self.order.push(name.clone()),
        }

        self.audit.register_module_version(&name, &version).await;
        info!(module = %name, version = %version, replaced, "module registered");
        true
    }

    /// Instantiate `M` from its family config block and register it.
    pub async fn register_type<M: ConfigurableModule>(
        &mut self,
        options: RegisterOptions,
    ) -> Result<bool> {
        let name = options.name.clone().unwrap_or_else(|| M::FAMILY.to_string());
        if !self.config.is_module_enabled(&name) {
            info!(module = %name, "module disabled in config; skipping registration");
            return Ok(false);
        }
        let block = self.config.module_config(M::FAMILY);
        let module = M::from_config(&block).map_err(|e| {
            ConfigError::Invalid(format!("cannot build module {}: {e}", M::FAMILY))
        })?;
        let options = RegisterOptions {
            name: Some(name),
            position: options.position,
        };
        Ok(self.register_module(Arc::new(module), options).await)
    }

    pub fn register_renderer(&mut self, renderer: Arc<dyn DossierRenderer>) {
        self.renderers.insert(renderer.format(), renderer);
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn ValidationModule>> {
        self.modules.get(name).cloned()
    }

    /// Registered module names in execution order.
    pub fn modules(&self) -> &[String] {
        &self.order
    }

    pub fn config(&self) -> &EtrialConfig {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn thresholds(&self) -> Option<&ThresholdManager> {
        self.thresholds.as_deref()
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// A KILL from a critical module stops the run when gating is on.
    pub fn is_critical(&self, module: &str) -> bool {
        match &self.thresholds {
            Some(tm) => tm.fail_stops_pipeline(module),
            None => {
                let normalized = normalize_module_name(module);
                DEFAULT_CRITICAL_MODULES.contains(&normalized.as_str())
            }
        }
    }

    pub fn overall_decision<I>(&self, decisions: I) -> Decision
    where
        I: IntoIterator<Item = Decision>,
    {
        match &self.thresholds {
            Some(tm) => tm.overall_decision(decisions),
            None => fallback_overall_decision(decisions),
        }
    }

    /// Caller subset filtered to registered names, first occurrence wins;
    /// otherwise the full registration order.
    fn resolve_modules(&self, requested: Option<Vec<String>>) -> Vec<String> {
        let Some(names) = requested else {
            return self.order.clone();
        };
        let mut resolved: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !self.modules.contains_key(&name) {
                warn!(module = %name, "requested module is not registered; ignoring");
            } else if !resolved.contains(&name) {
                resolved.push(name);
            }
        }
        resolved
    }

    /// Validate one candidate.
    ///
    /// Modules run strictly in order. Any module error aborts the call with
    /// [`PipelineError::ModuleFailed`]. The audit trail is saved before a
    /// result is returned; a save failure is an error.
    pub async fn validate(
        &self,
        candidate: &Candidate,
        options: ValidateOptions,
    ) -> Result<PipelineResult> {
        let hash = candidate.try_hash()?;
        let span = obs::candidate_span(&candidate.name, hash.as_str());
        self.run(candidate, hash, options).instrument(span).await
    }

    async fn run(
        &self,
        candidate: &Candidate,
        hash: CandidateHash,
        options: ValidateOptions,
    ) -> Result<PipelineResult> {
        let start = Instant::now();
        let stop_on_kill = options.stop_on_kill.unwrap_or(self.stop_on_kill);
        let modules = self.resolve_modules(options.modules);

        obs::emit_validation_started(&candidate.name, candidate.modality.as_str(), modules.len());
        self.audit
            .log_event(
                AuditEvent::new(EventKind::ValidationStarted)
                    .candidate(hash.clone())
                    .data(json!({
                        "candidate_name": candidate.name,
                        "modality": candidate.modality.as_str(),
                        "target": candidate.target,
                        "modules": modules,
                        "stop_on_kill": stop_on_kill,
                    })),
            )
            .await;

        if modules.is_empty() {
            return Err(PipelineError::NoModules);
        }

        let mut module_results: BTreeMap<String, ValidationResult> = BTreeMap::new();
        let mut execution_order: Vec<String> = Vec::with_capacity(modules.len());
        let mut gated_by: Option<String> = None;

        for (index, name) in modules.iter().enumerate() {
            let Some(module) = self.modules.get(name).cloned() else {
                continue;
            };

            self.audit
                .log_event(
                    AuditEvent::new(EventKind::ModuleStarted)
                        .module(name.as_str())
                        .candidate(hash.clone())
                        .data(json!({ "version": module.version() })),
                )
                .await;

            let module_start = Instant::now();
            let outcome = self.execute(module.as_ref(), candidate).await;
            let elapsed = module_start.elapsed();

            let mut result = match outcome {
                Ok(result) => result,
                Err(source) => {
                    return Err(self.fail_module(candidate, &hash, name, source).await);
                }
            };
            if result.runtime_seconds.is_none() {
                result.runtime_seconds = Some(elapsed.as_secs_f64());
            }

            METRICS.inc_modules_executed();
            obs::emit_module_completed(
                &candidate.name,
                name,
                result.decision,
                elapsed.as_millis() as u64,
            );
            self.audit
                .log_event(
                    AuditEvent::new(EventKind::ModuleCompleted)
                        .module(name.as_str())
                        .candidate(hash.clone())
                        .data(json!({
                            "decision": result.decision,
                            "runtime_seconds": result.runtime_seconds,
                            "n_metrics": result.metrics.len(),
                        })),
                )
                .await;

            let decision = result.decision;
            execution_order.push(name.clone());
            module_results.insert(name.clone(), result);

            if stop_on_kill && decision == Decision::Kill && self.is_critical(name) {
                METRICS.inc_gated_stops();
                obs::emit_pipeline_gated(&candidate.name, name, modules.len() - index - 1);
                gated_by = Some(name.clone());
                break;
            }
        }

        let overall_decision = self.overall_decision(
            execution_order
                .iter()
                .filter_map(|name| module_results.get(name))
                .map(|r| r.decision),
        );
        let total_runtime_seconds = start.elapsed().as_secs_f64();

        self.audit
            .log_event(
                AuditEvent::new(EventKind::ValidationCompleted)
                    .candidate(hash.clone())
                    .data(json!({
                        "overall_decision": overall_decision,
                        "total_runtime_seconds": total_runtime_seconds,
                        "modules_run": execution_order,
                        "gated_by": gated_by,
                    })),
            )
            .await;

        let result = PipelineResult {
            candidate: candidate.clone(),
            overall_decision,
            module_results,
            execution_order,
            gated_by,
            total_runtime_seconds,
            timestamp: Utc::now(),
            config_hash: self.config_hash.clone(),
            audit_trail_id: Some(self.audit.trail_id().to_string()),
        };

        let location = self.audit.save().await?;
        tracing::debug!(location = %location, "audit trail saved");

        METRICS.inc_candidates_validated();
        obs::emit_validation_completed(
            &candidate.name,
            overall_decision,
            (total_runtime_seconds * 1000.0) as u64,
            result.execution_order.len(),
        );
        Ok(result)
    }

    async fn execute(
        &self,
        module: &dyn ValidationModule,
        candidate: &Candidate,
    ) -> std::result::Result<ValidationResult, ModuleError> {
        match self.module_timeout {
            Some(timeout) => tokio::time::timeout(timeout, module.validate(candidate))
                .await
                .unwrap_or(Err(ModuleError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })),
            None => module.validate(candidate).await,
        }
    }

    /// Record a module failure and build the error returned to the caller.
    /// The trail is still saved so the failure is durable; a save error here
    /// is logged rather than masking the module error.
    async fn fail_module(
        &self,
        candidate: &Candidate,
        hash: &CandidateHash,
        name: &str,
        source: ModuleError,
    ) -> PipelineError {
        METRICS.inc_module_failures();
        obs::emit_module_failed(&candidate.name, name, &source);
        self.audit
            .log_event(
                AuditEvent::new(EventKind::ModuleFailed)
                    .module(name)
                    .candidate(hash.clone())
                    .data(json!({ "error": source.to_string() })),
            )
            .await;
        if let Err(e) = self.audit.save().await {
            warn!(error = %e, "failed to save audit trail after module failure");
        }
        PipelineError::ModuleFailed {
            module: name.to_string(),
            source,
        }
    }

    /// Render a dossier for `result`. JSON is built in; other formats need
    /// a registered renderer. Defaults to
    /// `<output_dir>/reports/<candidate>_dossier_<timestamp>.<ext>`.
    pub fn generate_dossier(
        &self,
        result: &PipelineResult,
        output_path: Option<&Path>,
        format: ReportFormat,
    ) -> Result<PathBuf> {
        let renderer: Arc<dyn DossierRenderer> = match (format, self.renderers.get(&format)) {
            (_, Some(renderer)) => renderer.clone(),
            (ReportFormat::Json, None) => Arc::new(JsonDossierRenderer),
            (other, None) => {
                return Err(PipelineError::Report(format!(
                    "no renderer registered for {other} dossiers"
                )))
            }
        };

        let path = match output_path {
            Some(p) => p.to_path_buf(),
            None => report::default_dossier_path(&self.config.reports_dir(), result, format),
        };
        let written = report::write_dossier(renderer.as_ref(), result, &path)
            .map_err(|e| PipelineError::Report(format!("{e:#}")))?;
        info!(path = %written.display(), format = %format, "dossier written");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticModule;

    #[test]
    fn fallback_rule() {
        use Decision::*;
        assert_eq!(fallback_overall_decision([Pass, Pass]), Pass);
        assert_eq!(fallback_overall_decision([Pass, Revise, Informative]), Revise);
        assert_eq!(fallback_overall_decision([Revise; 3]), Revise);
        assert_eq!(fallback_overall_decision([Revise; 4]), Kill);
        assert_eq!(fallback_overall_decision([Pass, Kill]), Kill);
        assert_eq!(fallback_overall_decision(Vec::new()), Pass);
    }

    async fn pipeline() -> ValidationPipeline {
        ValidationPipeline::builder(EtrialConfig::default())
            .audit(Arc::new(AuditTrail::in_memory()))
            .build()
            .await
            .expect("build")
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_slot() {
        let mut p = pipeline().await;
        for name in ["a", "b", "c"] {
            p.register_module(StaticModule::shared(name, Decision::Pass), RegisterOptions::default())
                .await;
        }
        p.register_module(StaticModule::shared("b", Decision::Kill), RegisterOptions::default())
            .await;
        assert_eq!(p.modules(), ["a", "b", "c"]);

        p.register_module(
            StaticModule::shared("c", Decision::Pass),
            RegisterOptions::default().at(0),
        )
        .await;
        assert_eq!(p.modules(), ["c", "a", "b"]);

        p.register_module(
            StaticModule::shared("d", Decision::Pass),
            RegisterOptions::default().at(99),
        )
        .await;
        assert_eq!(p.modules(), ["c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn critical_set_depends_on_thresholds() {
        let p = pipeline().await;
        assert!(p.is_critical("structure"));
        assert!(p.is_critical("Safety"));
        assert!(!p.is_critical("solubility"));

        let tm = ThresholdManager::from_yaml_str("gates:\n  solubility:\n    fail_stops_pipeline: true\n")
            .expect("thresholds");
        let p = ValidationPipeline::builder(EtrialConfig::default())
            .thresholds(tm)
            .audit(Arc::new(AuditTrail::in_memory()))
            .build()
            .await
            .expect("build");
        assert!(p.is_critical("solubility"));
        assert!(!p.is_critical("structure"));
    }

    #[tokio::test]
    async fn unknown_requested_modules_are_ignored() {
        let mut p = pipeline().await;
        p.register_module(StaticModule::shared("a", Decision::Pass), RegisterOptions::default())
            .await;
        let candidate = Candidate::new("X", crate::domain::Modality::Peptide, "T");

        let err = p
            .validate(&candidate, ValidateOptions::modules(["zzz"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoModules));

        let result = p
            .validate(&candidate, ValidateOptions::modules(["zzz", "a"]))
            .await
            .expect("validate");
        assert_eq!(result.execution_order, vec!["a".to_string()]);
    }
}
