//! Error taxonomy for the screening core.
//!
//! Only [`PipelineError`] crosses the orchestration boundary. Module failures
//! surface as [`ModuleError`] and are always wrapped; configuration problems
//! surface as [`ConfigError`].

use std::path::PathBuf;

use crate::digest::DigestError;

/// Malformed or unloadable configuration (pipeline config or threshold tree).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure raised by a validation module.
///
/// Expected "not applicable" situations (wrong modality, missing sequence)
/// are not errors: modules return an INFORMATIVE result for those.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("invalid module configuration: {0}")]
    InvalidConfig(String),

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Audit persistence and serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit digest error: {0}")]
    Digest(#[from] DigestError),

    #[error("audit store error: {0}")]
    Store(String),
}

/// The error type returned by pipeline orchestration.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no modules available to run")]
    NoModules,

    #[error("module {module} failed: {source}")]
    ModuleFailed {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error("audit trail error: {0}")]
    Audit(#[from] AuditError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("report generation failed: {0}")]
    Report(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] DigestError),
}

impl PipelineError {
    /// Name of the module that caused the failure, if any.
    pub fn module(&self) -> Option<&str> {
        match self {
            PipelineError::ModuleFailed { module, .. } => Some(module),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_failed_display_names_module_and_cause() {
        let err = PipelineError::ModuleFailed {
            module: "structure".to_string(),
            source: ModuleError::Execution("fold predictor crashed".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("structure"));
        assert!(msg.contains("fold predictor crashed"));
        assert_eq!(err.module(), Some("structure"));
    }

    #[test]
    fn timeout_display() {
        let err = ModuleError::Timeout { timeout_ms: 1500 };
        assert!(err.to_string().contains("1500ms"));
    }

    #[test]
    fn config_error_wraps_into_pipeline_error() {
        let err: PipelineError = ConfigError::Invalid("bad log level".to_string()).into();
        assert!(err.to_string().contains("bad log level"));
        assert!(err.module().is_none());
    }
}
