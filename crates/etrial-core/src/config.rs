//! Pipeline configuration.
//!
//! Loaded once from YAML and passed by value (usually behind an `Arc`) to
//! every component. The document has a `global` section, a `modules`
//! enable map, `reporting` and `audit` sections, and any number of opaque
//! per-module-family blocks at the top level:
//!
//! ```yaml
//! global:
//!   random_seed: 42
//!   n_jobs: -1
//!   log_level: INFO
//! modules:
//!   immunogenicity: false
//! structure:
//!   predictor: esmfold
//! audit:
//!   auto_save: true
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::digest::short_digest;
use crate::error::ConfigError;

/// Normalize a module name for lookups: lower-case, `-` and spaces become `_`.
pub fn normalize_module_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_n_jobs() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Global scalars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    /// Parallelism hint: `<= 0` means all available cores.
    #[serde(default = "default_n_jobs")]
    pub n_jobs: i64,
    #[serde(default = "default_true")]
    pub gpu_enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub module_timeout_secs: Option<u64>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            random_seed: default_seed(),
            n_jobs: default_n_jobs(),
            gpu_enabled: true,
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
            module_timeout_secs: None,
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSettings {
    /// Flush each event to the store as it is logged.
    #[serde(default = "default_true")]
    pub auto_save: bool,
    #[serde(default = "default_true")]
    pub include_environment: bool,
    /// Trail directory; defaults to `<output_dir>/audit`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            include_environment: true,
            dir: None,
        }
    }
}

/// Wire shape of the YAML document.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    global: GlobalSettings,
    #[serde(default)]
    modules: BTreeMap<String, bool>,
    #[serde(default)]
    reporting: serde_json::Value,
    #[serde(default)]
    audit: AuditSettings,
    #[serde(flatten)]
    sections: BTreeMap<String, serde_json::Value>,
}

/// Immutable configuration for a pipeline.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EtrialConfig {
    pub global: GlobalSettings,
    /// Module enable map; absent names are enabled.
    pub modules: BTreeMap<String, bool>,
    /// Opaque option blocks keyed by normalized module-family name.
    pub module_configs: BTreeMap<String, serde_json::Value>,
    pub reporting: serde_json::Value,
    pub audit: AuditSettings,
}

impl EtrialConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<inline>"))
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        let config = Self {
            global: raw.global,
            modules: raw.modules,
            module_configs: raw
                .sections
                .into_iter()
                .map(|(name, block)| (normalize_module_name(&name), block))
                .collect(),
            reporting: raw.reporting,
            audit: raw.audit,
        };
        config.log_level()?;
        Ok(config)
    }

    /// Absent names default to enabled.
    pub fn is_module_enabled(&self, name: &str) -> bool {
        if let Some(enabled) = self.modules.get(name) {
            return *enabled;
        }
        let normalized = normalize_module_name(name);
        self.modules
            .iter()
            .find(|(key, _)| normalize_module_name(key) == normalized)
            .map(|(_, enabled)| *enabled)
            .unwrap_or(true)
    }

    /// Option block for a module family; an empty object on miss.
    pub fn module_config(&self, name: &str) -> serde_json::Value {
        self.module_configs
            .get(&normalize_module_name(name))
            .cloned()
            .unwrap_or_else(|| json!({}))
    }

    /// Reproducibility fingerprint: version, seed, enable map and module
    /// blocks. Paths, log level and parallelism are excluded.
    pub fn config_hash(&self) -> String {
        let identity = json!({
            "version": self.global.version,
            "random_seed": self.global.random_seed,
            "modules": self.modules,
            "module_configs": self.module_configs,
        });
        short_digest(&identity).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config contains non-canonical numbers; hashing debug form");
            crate::digest::sha256_hex(format!("{identity:?}").as_bytes())[..16].to_string()
        })
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.global
            .log_level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.global.log_level)))
    }

    /// Worker-pool width for a stage.
    pub fn max_concurrency(&self) -> usize {
        if self.global.n_jobs > 0 {
            self.global.n_jobs as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn module_timeout(&self) -> Option<Duration> {
        self.global.module_timeout_secs.map(Duration::from_secs)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| self.global.output_dir.join("audit"))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.global.output_dir.join("reports")
    }

    pub fn enabled_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
global:
  random_seed: 7
  n_jobs: 4
  log_level: debug
  module_timeout_secs: 30
modules:
  structure: true
  immunogenicity: false
structure:
  predictor: esmfold
  recycles: 3
Safety-Screen:
  alerts: [pains]
audit:
  auto_save: false
"#;

    #[test]
    fn parses_sections_and_defaults() {
        let config = EtrialConfig::from_yaml_str(SAMPLE).expect("parse");
        assert_eq!(config.global.random_seed, 7);
        assert_eq!(config.global.version, "0.1.0");
        assert_eq!(config.max_concurrency(), 4);
        assert_eq!(config.module_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.audit.auto_save);
        assert!(config.audit.include_environment);
        assert_eq!(config.log_level().expect("level"), tracing::Level::DEBUG);
        assert_eq!(config.audit_dir(), PathBuf::from("outputs/audit"));
    }

    #[test]
    fn module_config_lookup_is_normalized_with_empty_default() {
        let config = EtrialConfig::from_yaml_str(SAMPLE).expect("parse");
        assert_eq!(config.module_config("structure")["predictor"], "esmfold");
        assert_eq!(config.module_config("safety_screen")["alerts"][0], "pains");
        assert_eq!(config.module_config("pkpd"), json!({}));
    }

    #[test]
    fn modules_default_to_enabled() {
        let config = EtrialConfig::from_yaml_str(SAMPLE).expect("parse");
        assert!(config.is_module_enabled("structure"));
        assert!(!config.is_module_enabled("immunogenicity"));
        assert!(!config.is_module_enabled("Immunogenicity"));
        assert!(config.is_module_enabled("pkpd"));
        assert_eq!(config.enabled_modules(), vec!["structure"]);
    }

    #[test]
    fn config_hash_ignores_paths_and_log_level() {
        let a = EtrialConfig::from_yaml_str(SAMPLE).expect("parse");
        let mut b = a.clone();
        b.global.output_dir = PathBuf::from("/elsewhere");
        b.global.log_level = "WARN".to_string();
        assert_eq!(a.config_hash(), b.config_hash());

        b.global.random_seed = 8;
        assert_ne!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 16);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = EtrialConfig::from_yaml_str("").expect("parse");
        assert_eq!(config, EtrialConfig::default());
    }

    #[test]
    fn invalid_log_level_is_configuration_error() {
        let err = EtrialConfig::from_yaml_str("global:\n  log_level: loud\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = EtrialConfig::from_yaml_str("global: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EtrialConfig::from_yaml_path("/nonexistent/etrial.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
