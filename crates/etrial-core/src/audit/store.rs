//! Persistence backends for audit trails.

use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::entry::{AuditEntry, AuditRecord};
use crate::error::AuditError;

/// Durable sink for audit entries and whole trails.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Flush a single entry as soon as it is logged.
    async fn persist_entry(&self, trail_id: &str, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Persist the complete record; returns where it was written.
    async fn save_trail(&self, record: &AuditRecord) -> Result<String, AuditError>;
}

/// Serialize `value` as pretty JSON and write it atomically: temp file in
/// the target directory, then rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), AuditError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let io_err = |source: std::io::Error| AuditError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Filesystem store.
///
/// Layout:
/// - `<dir>/entry_<entry id>.json`
/// - `<dir>/audit_trail_<YYYYmmdd_HHMMSS>_<first 8 chars of trail id>.json`
#[derive(Debug, Clone)]
pub struct FsAuditStore {
    dir: PathBuf,
}

impl FsAuditStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| AuditError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, entry_id: &str) -> PathBuf {
        self.dir.join(format!("entry_{entry_id}.json"))
    }

    /// Stable per trail: named from the record's creation time, so every
    /// save of the same trail overwrites one file.
    pub fn trail_path(&self, record: &AuditRecord) -> PathBuf {
        let stamp = record.created_at.format("%Y%m%d_%H%M%S");
        let short: String = record.trail_id.chars().take(8).collect();
        self.dir.join(format!("audit_trail_{stamp}_{short}.json"))
    }

    async fn write_blocking<T>(&self, path: PathBuf, value: T) -> Result<(), AuditError>
    where
        T: Serialize + Send + 'static,
    {
        tokio::task::spawn_blocking(move || write_json_atomic(&path, &value))
            .await
            .map_err(|e| AuditError::Store(format!("audit writer task failed: {e}")))?
    }
}

#[async_trait]
impl AuditStore for FsAuditStore {
    async fn persist_entry(&self, _trail_id: &str, entry: &AuditEntry) -> Result<(), AuditError> {
        let path = self.entry_path(&entry.id);
        self.write_blocking(path, entry.clone()).await
    }

    async fn save_trail(&self, record: &AuditRecord) -> Result<String, AuditError> {
        let path = self.trail_path(record);
        self.write_blocking(path.clone(), record.clone()).await?;
        tracing::debug!(path = %path.display(), entries = record.entries.len(), "audit trail saved");
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{AuditEvent, EventKind};

    #[tokio::test]
    async fn entries_and_trails_land_in_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsAuditStore::new(dir.path().join("audit")).expect("store");

        let entry = AuditEntry::from_event(AuditEvent::new(EventKind::ConfigSet));
        store.persist_entry("trail", &entry).await.expect("persist");
        assert!(store.entry_path(&entry.id).exists());

        let mut record = AuditRecord::new("0123456789-trail", None);
        record.entries.push(entry);
        let location = store.save_trail(&record).await.expect("save");
        assert!(location.contains("audit_trail_"));
        assert!(location.ends_with("_01234567.json"));

        let back = AuditRecord::load(&location).expect("load");
        assert_eq!(back, record);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("record.json");
        write_json_atomic(&path, &serde_json::json!({ "a": 1 })).expect("write");
        write_json_atomic(&path, &serde_json::json!({ "a": 2 })).expect("overwrite");

        let files: Vec<_> = std::fs::read_dir(dir.path()).expect("read_dir").collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains('2'));
    }
}
