//! In-memory audit stores for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::entry::{AuditEntry, AuditRecord};
use super::store::AuditStore;
use crate::error::AuditError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps persisted entries and saved trails in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<(String, AuditEntry)>>,
    trails: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries flushed so far, as `(trail id, entry)` pairs.
    pub fn persisted_entries(&self) -> Vec<(String, AuditEntry)> {
        lock(&self.entries).clone()
    }

    pub fn saved_trails(&self) -> Vec<AuditRecord> {
        lock(&self.trails).clone()
    }

    pub fn last_trail(&self) -> Option<AuditRecord> {
        lock(&self.trails).last().cloned()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn persist_entry(&self, trail_id: &str, entry: &AuditEntry) -> Result<(), AuditError> {
        lock(&self.entries).push((trail_id.to_string(), entry.clone()));
        Ok(())
    }

    async fn save_trail(&self, record: &AuditRecord) -> Result<String, AuditError> {
        let mut trails = lock(&self.trails);
        trails.push(record.clone());
        Ok(format!("memory://{}/{}", record.trail_id, trails.len()))
    }
}

/// Memory store with switchable failures.
#[derive(Debug, Default)]
pub struct FlakyAuditStore {
    inner: MemoryAuditStore,
    fail_entries: AtomicBool,
    fail_saves: AtomicBool,
}

impl FlakyAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_entries() -> Self {
        let store = Self::default();
        store.set_fail_entries(true);
        store
    }

    pub fn failing_saves() -> Self {
        let store = Self::default();
        store.set_fail_saves(true);
        store
    }

    pub fn set_fail_entries(&self, fail: bool) {
        self.fail_entries.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryAuditStore {
        &self.inner
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn persist_entry(&self, trail_id: &str, entry: &AuditEntry) -> Result<(), AuditError> {
        if self.fail_entries.load(Ordering::SeqCst) {
            return Err(AuditError::Store("injected entry failure".to_string()));
        }
        self.inner.persist_entry(trail_id, entry).await
    }

    async fn save_trail(&self, record: &AuditRecord) -> Result<String, AuditError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AuditError::Store("injected save failure".to_string()));
        }
        self.inner.save_trail(record).await
    }
}
