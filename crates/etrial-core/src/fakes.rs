//! Test doubles for modules and audit stores.
//!
//! Fixed-outcome modules let pipeline behaviour (ordering, gating,
//! aggregation, failure handling) be exercised without any scoring code.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Candidate, Decision, MetricResult, ValidationResult};
use crate::error::ModuleError;
use crate::module::{ConfigurableModule, ValidationModule};

pub use crate::audit::fakes::{FlakyAuditStore, MemoryAuditStore};

/// Returns the same decision for every candidate and counts its calls.
#[derive(Debug)]
pub struct StaticModule {
    name: String,
    version: String,
    decision: Decision,
    metrics: Vec<MetricResult>,
    calls: AtomicUsize,
}

impl StaticModule {
    pub fn new(name: impl Into<String>, decision: Decision) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            decision,
            metrics: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn shared(name: impl Into<String>, decision: Decision) -> Arc<dyn ValidationModule> {
        Arc::new(Self::new(name, decision))
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_metric(mut self, metric: MetricResult) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn validate(&self, candidate: &Candidate) -> Result<ValidationResult, ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = ValidationResult::new(
            &self.name,
            &self.version,
            candidate,
            self.decision,
            format!("{} returned {}", self.name, self.decision),
        );
        result.metrics = self.metrics.clone();
        Ok(result)
    }
}

/// Static module buildable from config: `decision` (default PASS) and
/// `version` keys of the `static_check` block.
#[derive(Debug)]
pub struct ConfiguredStaticModule(StaticModule);

impl ConfiguredStaticModule {
    pub fn decision(&self) -> Decision {
        self.0.decision
    }
}

#[async_trait]
impl ValidationModule for ConfiguredStaticModule {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn version(&self) -> &str {
        self.0.version()
    }

    async fn validate(&self, candidate: &Candidate) -> Result<ValidationResult, ModuleError> {
        self.0.validate(candidate).await
    }
}

impl ConfigurableModule for ConfiguredStaticModule {
    const FAMILY: &'static str = "static_check";

    fn from_config(config: &serde_json::Value) -> Result<Self, ModuleError> {
        let decision = match config.get("decision").and_then(|d| d.as_str()) {
            Some(raw) => raw.parse::<Decision>().map_err(ModuleError::InvalidConfig)?,
            None => Decision::Pass,
        };
        let mut module = StaticModule::new(Self::FAMILY, decision);
        if let Some(version) = config.get("version").and_then(|v| v.as_str()) {
            module = module.with_version(version);
        }
        Ok(Self(module))
    }
}

/// Decides per candidate through a closure.
pub struct FnModule<F> {
    name: String,
    decide: F,
    calls: AtomicUsize,
}

impl<F> FnModule<F>
where
    F: Fn(&Candidate) -> Decision + Send + Sync,
{
    pub fn new(name: impl Into<String>, decide: F) -> Self {
        Self {
            name: name.into(),
            decide,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> ValidationModule for FnModule<F>
where
    F: Fn(&Candidate) -> Decision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn validate(&self, candidate: &Candidate) -> Result<ValidationResult, ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let decision = (self.decide)(candidate);
        Ok(ValidationResult::new(
            &self.name,
            "1.0.0",
            candidate,
            decision,
            format!("{} decided {decision}", self.name),
        ))
    }
}

/// Always fails with [`ModuleError::Execution`].
#[derive(Debug)]
pub struct FailingModule {
    name: String,
    message: String,
}

impl FailingModule {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ValidationModule for FailingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    async fn validate(&self, _candidate: &Candidate) -> Result<ValidationResult, ModuleError> {
        Err(ModuleError::Execution(self.message.clone()))
    }
}

/// Sleeps before returning a fixed decision.
#[derive(Debug)]
pub struct SlowModule {
    inner: StaticModule,
    delay: Duration,
}

impl SlowModule {
    pub fn new(name: impl Into<String>, decision: Decision, delay: Duration) -> Self {
        Self {
            inner: StaticModule::new(name, decision),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl ValidationModule for SlowModule {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn validate(&self, candidate: &Candidate) -> Result<ValidationResult, ModuleError> {
        tokio::time::sleep(self.delay).await;
        self.inner.validate(candidate).await
    }
}
