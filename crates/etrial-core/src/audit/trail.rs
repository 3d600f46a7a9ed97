//! The append-only audit trail shared by a pipeline and its callers.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::entry::{AuditEntry, AuditEvent, AuditRecord, EventKind, ReproducibilityReport};
use super::environment::EnvironmentSnapshot;
use super::fakes::MemoryAuditStore;
use super::store::{AuditStore, FsAuditStore};
use crate::config::EtrialConfig;
use crate::digest::compute_digest;
use crate::error::AuditError;
use crate::metrics::METRICS;
use crate::obs;

/// Construction options for [`AuditTrail`].
#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Explicit trail id; a UUID v4 is generated when absent.
    pub trail_id: Option<String>,
    /// Flush every entry to the store as it is logged.
    pub auto_persist: bool,
    pub capture_environment: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            trail_id: None,
            auto_persist: true,
            capture_environment: true,
        }
    }
}

/// Append-only event log with one environment snapshot.
///
/// Appends are serialized behind an async mutex. Entries from concurrently
/// validated candidates may interleave; per-candidate order is preserved.
pub struct AuditTrail {
    trail_id: String,
    record: Mutex<AuditRecord>,
    /// Held across snapshot and write so saves land in snapshot order.
    save_lock: Mutex<()>,
    store: Arc<dyn AuditStore>,
    auto_persist: bool,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("trail_id", &self.trail_id)
            .field("auto_persist", &self.auto_persist)
            .finish_non_exhaustive()
    }
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, options: AuditOptions) -> Self {
        let trail_id = options
            .trail_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let environment = options
            .capture_environment
            .then(EnvironmentSnapshot::capture);

        Self {
            record: Mutex::new(AuditRecord::new(trail_id.clone(), environment)),
            save_lock: Mutex::new(()),
            trail_id,
            store,
            auto_persist: options.auto_persist,
        }
    }

    /// Trail backed by a [`MemoryAuditStore`], without environment capture.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryAuditStore::new()),
            AuditOptions {
                capture_environment: false,
                ..AuditOptions::default()
            },
        )
    }

    /// Filesystem trail laid out according to the `audit` config section.
    pub fn from_config(config: &EtrialConfig) -> Result<Self, AuditError> {
        let store = FsAuditStore::new(config.audit_dir())?;
        Ok(Self::new(
            Arc::new(store),
            AuditOptions {
                trail_id: None,
                auto_persist: config.audit.auto_save,
                capture_environment: config.audit.include_environment,
            },
        ))
    }

    pub fn trail_id(&self) -> &str {
        &self.trail_id
    }

    /// Append an event. With auto-persist on, the entry is flushed before
    /// returning; a flush failure is logged and counted, and the entry is
    /// kept for the next full save.
    pub async fn log_event(&self, event: AuditEvent) -> AuditEntry {
        let entry = AuditEntry::from_event(event);
        self.record.lock().await.entries.push(entry.clone());

        if self.auto_persist {
            if let Err(e) = self.store.persist_entry(&self.trail_id, &entry).await {
                METRICS.inc_audit_persist_failures();
                obs::emit_audit_persist_failed(&self.trail_id, &e);
            }
        }
        entry
    }

    pub async fn set_config_hash(&self, hash: &str) {
        self.record.lock().await.config_hash = Some(hash.to_string());
        self.log_event(AuditEvent::new(EventKind::ConfigSet).data(json!({ "config_hash": hash })))
            .await;
    }

    pub async fn register_module_version(&self, module: &str, version: &str) {
        self.record
            .lock()
            .await
            .model_versions
            .insert(module.to_string(), version.to_string());
        self.log_event(
            AuditEvent::new(EventKind::ModelRegistered)
                .module(module)
                .data(json!({ "version": version })),
        )
        .await;
    }

    /// Stream a file through SHA-256 and log a `file_hashed` event.
    pub async fn hash_file(&self, path: impl AsRef<Path>) -> Result<String, AuditError> {
        let path = path.as_ref().to_path_buf();
        let hash = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| AuditError::Store(format!("hash task failed: {e}")))??
        };

        self.log_event(
            AuditEvent::new(EventKind::FileHashed)
                .data(json!({ "path": path.display().to_string(), "hash": hash }))
                .input_hash(path.display().to_string(), hash.clone()),
        )
        .await;
        Ok(hash)
    }

    /// SHA-256 over the canonical JSON of `value`.
    pub fn hash_data<T: Serialize + ?Sized>(value: &T) -> Result<String, AuditError> {
        Ok(compute_digest(value)?)
    }

    /// Persist the full record through the store; returns its location.
    pub async fn save(&self) -> Result<String, AuditError> {
        let _guard = self.save_lock.lock().await;
        let record = self.snapshot().await;
        self.store.save_trail(&record).await
    }

    /// Write the full record to `path`.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), AuditError> {
        let _guard = self.save_lock.lock().await;
        let record = self.snapshot().await;
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || record.save_to(path))
            .await
            .map_err(|e| AuditError::Store(format!("audit writer task failed: {e}")))?
    }

    pub fn load(path: impl AsRef<Path>) -> Result<AuditRecord, AuditError> {
        AuditRecord::load(path)
    }

    /// Clone of the current record.
    pub async fn snapshot(&self) -> AuditRecord {
        self.record.lock().await.clone()
    }

    pub async fn timeline(&self) -> Vec<AuditEntry> {
        self.snapshot()
            .await
            .timeline()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn events_by_kind(&self, kind: &EventKind) -> Vec<AuditEntry> {
        let record = self.record.lock().await;
        record.events_by_kind(kind).into_iter().cloned().collect()
    }

    pub async fn events_by_module(&self, module: &str) -> Vec<AuditEntry> {
        let record = self.record.lock().await;
        record.events_by_module(module).into_iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.record.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn config_hash(&self) -> Option<String> {
        self.record.lock().await.config_hash.clone()
    }

    pub async fn environment(&self) -> Option<EnvironmentSnapshot> {
        self.record.lock().await.environment.clone()
    }

    pub async fn verify_reproducibility(&self, other: &AuditRecord) -> ReproducibilityReport {
        self.record.lock().await.verify_reproducibility(other)
    }
}

fn sha256_file(path: &Path) -> Result<String, AuditError> {
    let io_err = |source: std::io::Error| AuditError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::fakes::FlakyAuditStore;
    use crate::digest::sha256_hex;

    #[tokio::test]
    async fn log_event_assigns_ids_and_persists() {
        let store = Arc::new(MemoryAuditStore::new());
        let trail = AuditTrail::new(store.clone(), AuditOptions::default());

        let a = trail.log_event(AuditEvent::new(EventKind::ValidationStarted)).await;
        let b = trail.log_event(AuditEvent::new("batch_note")).await;
        assert_ne!(a.id, b.id);
        assert_eq!(trail.len().await, 2);

        let persisted = store.persisted_entries();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].0, trail.trail_id());
        assert!(trail.environment().await.is_some());
    }

    #[tokio::test]
    async fn persist_failure_keeps_entry_in_memory() {
        let store = Arc::new(FlakyAuditStore::failing_entries());
        let trail = AuditTrail::new(store.clone(), AuditOptions::default());

        trail.set_config_hash("0123456789abcdef").await;
        assert_eq!(trail.len().await, 1);
        assert!(store.inner().persisted_entries().is_empty());

        let location = trail.save().await.expect("full save still works");
        assert!(location.starts_with("memory://"));
        let saved = store.inner().last_trail().expect("saved trail");
        assert_eq!(saved.entries.len(), 1);
        assert_eq!(saved.config_hash.as_deref(), Some("0123456789abcdef"));
    }

    #[tokio::test]
    async fn save_failure_is_propagated() {
        let store = Arc::new(FlakyAuditStore::failing_saves());
        let trail = AuditTrail::new(store, AuditOptions::default());
        assert!(matches!(trail.save().await, Err(AuditError::Store(_))));
    }

    #[tokio::test]
    async fn auto_persist_off_skips_entry_flush() {
        let store = Arc::new(MemoryAuditStore::new());
        let trail = AuditTrail::new(
            store.clone(),
            AuditOptions {
                auto_persist: false,
                ..AuditOptions::default()
            },
        );
        trail.register_module_version("structure", "1.2.0").await;
        assert!(store.persisted_entries().is_empty());
        assert_eq!(trail.snapshot().await.model_versions["structure"], "1.2.0");
    }

    #[tokio::test]
    async fn hash_file_streams_and_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("candidate.fasta");
        std::fs::write(&path, b">AB-001\nEVQLVESGG\n").expect("write");

        let trail = AuditTrail::in_memory();
        let hash = trail.hash_file(&path).await.expect("hash");
        assert_eq!(hash, sha256_hex(b">AB-001\nEVQLVESGG\n"));

        let events = trail.events_by_kind(&EventKind::FileHashed).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["hash"], hash);

        assert!(trail.hash_file(dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn hash_data_is_key_order_independent() {
        let a = AuditTrail::hash_data(&json!({ "b": 1, "a": 2 })).expect("a");
        let b = AuditTrail::hash_data(&json!({ "a": 2, "b": 1 })).expect("b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
