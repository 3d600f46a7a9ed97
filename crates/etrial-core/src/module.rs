//! The contract every validation module satisfies.

use async_trait::async_trait;

use crate::domain::{Candidate, ValidationResult};
use crate::error::ModuleError;

/// One independent assessment unit.
///
/// Implementations must not mutate the candidate. Expected "not applicable"
/// situations (wrong modality, missing sequence) return an INFORMATIVE
/// result via [`ValidationResult::not_applicable`], not an error.
#[async_trait]
pub trait ValidationModule: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    async fn validate(&self, candidate: &Candidate) -> Result<ValidationResult, ModuleError>;
}

/// A module that can be built from its family's configuration block.
pub trait ConfigurableModule: ValidationModule + Sized + 'static {
    /// Config section name (`structure`, `safety`, ...).
    const FAMILY: &'static str;

    /// Build from the family block; an empty object when the config has none.
    fn from_config(config: &serde_json::Value) -> Result<Self, ModuleError>;
}

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Registry name; defaults to the module's own name.
    pub name: Option<String>,
    /// Slot in the execution order; appended when absent. Values past the
    /// end append.
    pub position: Option<usize>,
}

impl RegisterOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            position: None,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}
