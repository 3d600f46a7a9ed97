//! Audit events and the persisted trail record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::environment::EnvironmentSnapshot;
use super::store::write_json_atomic;
use crate::domain::CandidateHash;
use crate::error::AuditError;

/// Kind of an audit event. Serialized as its snake_case name; unknown
/// names read back as [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    ConfigSet,
    ModelRegistered,
    FileHashed,
    ValidationStarted,
    ModuleStarted,
    ModuleCompleted,
    ModuleFailed,
    ValidationCompleted,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ConfigSet => "config_set",
            EventKind::ModelRegistered => "model_registered",
            EventKind::FileHashed => "file_hashed",
            EventKind::ValidationStarted => "validation_started",
            EventKind::ModuleStarted => "module_started",
            EventKind::ModuleCompleted => "module_completed",
            EventKind::ModuleFailed => "module_failed",
            EventKind::ValidationCompleted => "validation_completed",
            EventKind::Custom(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "config_set" => EventKind::ConfigSet,
            "model_registered" => EventKind::ModelRegistered,
            "file_hashed" => EventKind::FileHashed,
            "validation_started" => EventKind::ValidationStarted,
            "module_started" => EventKind::ModuleStarted,
            "module_completed" => EventKind::ModuleCompleted,
            "module_failed" => EventKind::ModuleFailed,
            "validation_completed" => EventKind::ValidationCompleted,
            _ => EventKind::Custom(name),
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from(name.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event to be logged. Converted into an [`AuditEntry`] (id and
/// timestamp assigned) by `AuditTrail::log_event`.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: EventKind,
    pub module: Option<String>,
    pub candidate_hash: Option<CandidateHash>,
    pub data: serde_json::Value,
    pub input_hashes: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            module: None,
            candidate_hash: None,
            data: serde_json::Value::Object(serde_json::Map::new()),
            input_hashes: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn candidate(mut self, hash: CandidateHash) -> Self {
        self.candidate_hash = Some(hash);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn input_hash(mut self, name: impl Into<String>, hash: impl Into<String>) -> Self {
        self.input_hashes.insert(name.into(), hash.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One immutable entry of the trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub candidate_hash: Option<CandidateHash>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub input_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuditEntry {
    pub(crate) fn from_event(event: AuditEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind: event.kind,
            module: event.module,
            candidate_hash: event.candidate_hash,
            data: event.data,
            input_hashes: event.input_hashes,
            metadata: event.metadata,
        }
    }
}

/// Per-dimension outcome of comparing two trails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReproducibilityReport {
    pub config_match: bool,
    pub model_versions_match: bool,
    pub environment_match: bool,
    /// Human-readable description of every mismatch.
    #[serde(default)]
    pub differences: Vec<String>,
}

impl ReproducibilityReport {
    pub fn is_reproducible(&self) -> bool {
        self.config_match && self.model_versions_match && self.environment_match
    }
}

/// The persisted audit artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub trail_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub model_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: Option<EnvironmentSnapshot>,
    #[serde(default)]
    pub entries: Vec<AuditEntry>,
}

impl AuditRecord {
    pub fn new(trail_id: impl Into<String>, environment: Option<EnvironmentSnapshot>) -> Self {
        Self {
            trail_id: trail_id.into(),
            created_at: Utc::now(),
            config_hash: None,
            model_versions: BTreeMap::new(),
            environment,
            entries: Vec::new(),
        }
    }

    /// Read a trail written by [`AuditRecord::save_to`] or an `AuditStore`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the record as pretty JSON, atomically.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), AuditError> {
        write_json_atomic(path.as_ref(), self)
    }

    /// Entries ordered by timestamp; ties keep insertion order.
    pub fn timeline(&self) -> Vec<&AuditEntry> {
        let mut entries: Vec<&AuditEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    pub fn events_by_kind(&self, kind: &EventKind) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| &e.kind == kind).collect()
    }

    pub fn events_by_module(&self, module: &str) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.module.as_deref() == Some(module))
            .collect()
    }

    pub fn events_for_candidate(&self, hash: &CandidateHash) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.candidate_hash.as_ref() == Some(hash))
            .collect()
    }

    /// Compare configuration hash, module versions and environment with
    /// another trail. The environment capture time is ignored.
    pub fn verify_reproducibility(&self, other: &AuditRecord) -> ReproducibilityReport {
        let mut differences = Vec::new();

        let config_match = self.config_hash == other.config_hash;
        if !config_match {
            differences.push(format!(
                "config hash: {} vs {}",
                self.config_hash.as_deref().unwrap_or("<unset>"),
                other.config_hash.as_deref().unwrap_or("<unset>"),
            ));
        }

        let model_versions_match = self.model_versions == other.model_versions;
        if !model_versions_match {
            let names: std::collections::BTreeSet<&String> = self
                .model_versions
                .keys()
                .chain(other.model_versions.keys())
                .collect();
            for name in names {
                let ours = self.model_versions.get(name);
                let theirs = other.model_versions.get(name);
                if ours != theirs {
                    differences.push(format!(
                        "module {name}: {} vs {}",
                        ours.map(String::as_str).unwrap_or("<absent>"),
                        theirs.map(String::as_str).unwrap_or("<absent>"),
                    ));
                }
            }
        }

        let environment_match = match (&self.environment, &other.environment) {
            (Some(a), Some(b)) => {
                let diffs = a.differences(b);
                differences.extend(diffs.iter().map(|d| format!("environment {d}")));
                diffs.is_empty()
            }
            (None, None) => true,
            _ => {
                differences.push("environment: captured on one side only".to_string());
                false
            }
        };

        ReproducibilityReport {
            config_match,
            model_versions_match,
            environment_match,
            differences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(kind: EventKind, module: Option<&str>, ts: DateTime<Utc>) -> AuditEntry {
        let mut e = AuditEntry::from_event(AuditEvent::new(kind));
        e.module = module.map(str::to_string);
        e.timestamp = ts;
        e
    }

    #[test]
    fn event_kind_serializes_as_name() {
        let json = serde_json::to_string(&EventKind::ModuleCompleted).expect("serialize");
        assert_eq!(json, "\"module_completed\"");
        let custom: EventKind = serde_json::from_str("\"batch_note\"").expect("deserialize");
        assert_eq!(custom, EventKind::Custom("batch_note".to_string()));
        assert_eq!(EventKind::from("config_set"), EventKind::ConfigSet);
    }

    #[test]
    fn timeline_is_stable_on_equal_timestamps() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(5);
        let mut record = AuditRecord::new("trail", None);
        record.entries = vec![
            entry(EventKind::ModuleCompleted, Some("b"), t1),
            entry(EventKind::ModuleStarted, Some("a"), t0),
            entry(EventKind::ModuleCompleted, Some("a"), t0),
        ];

        let kinds: Vec<_> = record
            .timeline()
            .into_iter()
            .map(|e| (e.kind.clone(), e.module.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::ModuleStarted, Some("a".to_string())),
                (EventKind::ModuleCompleted, Some("a".to_string())),
                (EventKind::ModuleCompleted, Some("b".to_string())),
            ]
        );
        assert_eq!(record.events_by_module("a").len(), 2);
        assert_eq!(record.events_by_kind(&EventKind::ModuleCompleted).len(), 2);
    }

    #[test]
    fn verify_reports_each_dimension() {
        let mut a = AuditRecord::new("a", None);
        a.config_hash = Some("aaaa".to_string());
        a.model_versions.insert("structure".into(), "1.0".into());
        let mut b = a.clone();
        b.trail_id = "b".to_string();

        let report = a.verify_reproducibility(&b);
        assert!(report.is_reproducible());
        assert!(report.differences.is_empty());

        b.model_versions.insert("structure".into(), "1.1".into());
        let report = a.verify_reproducibility(&b);
        assert!(report.config_match);
        assert!(!report.model_versions_match);
        assert!(report.environment_match);
        assert_eq!(report.differences.len(), 1);
        assert!(report.differences[0].contains("1.0 vs 1.1"));
    }

    #[test]
    fn record_json_round_trip() {
        let mut record = AuditRecord::new("trail-1", None);
        record.config_hash = Some("0123456789abcdef".into());
        record.entries.push(AuditEntry::from_event(
            AuditEvent::new(EventKind::ModuleFailed)
                .module("safety")
                .data(json!({ "error": "boom" }))
                .input_hash("structure.pdb", "abc"),
        ));
        let json = serde_json::to_string(&record).expect("serialize");
        let back: AuditRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }
}
