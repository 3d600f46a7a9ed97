//! Global atomic counters for screening runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    candidates_validated: AtomicU64,
    modules_executed: AtomicU64,
    gated_stops: AtomicU64,
    module_failures: AtomicU64,
    audit_persist_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            candidates_validated: AtomicU64::new(0),
            modules_executed: AtomicU64::new(0),
            gated_stops: AtomicU64::new(0),
            module_failures: AtomicU64::new(0),
            audit_persist_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_candidates_validated(&self) {
        self.candidates_validated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "candidates_validated", "counter incremented");
    }

    pub fn inc_modules_executed(&self) {
        self.modules_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "modules_executed", "counter incremented");
    }

    pub fn inc_gated_stops(&self) {
        self.gated_stops.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "gated_stops", "counter incremented");
    }

    pub fn inc_module_failures(&self) {
        self.module_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "module_failures", "counter incremented");
    }

    pub fn inc_audit_persist_failures(&self) {
        self.audit_persist_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "audit_persist_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            candidates_validated = self.candidates_validated(),
            modules_executed = self.modules_executed(),
            gated_stops = self.gated_stops(),
            module_failures = self.module_failures(),
            audit_persist_failures = self.audit_persist_failures(),
        );
    }

    pub fn candidates_validated(&self) -> u64 {
        self.candidates_validated.load(Ordering::Relaxed)
    }

    pub fn modules_executed(&self) -> u64 {
        self.modules_executed.load(Ordering::Relaxed)
    }

    pub fn gated_stops(&self) -> u64 {
        self.gated_stops.load(Ordering::Relaxed)
    }

    pub fn module_failures(&self) -> u64 {
        self.module_failures.load(Ordering::Relaxed)
    }

    pub fn audit_persist_failures(&self) -> u64 {
        self.audit_persist_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.candidates_validated.store(0, Ordering::Relaxed);
        self.modules_executed.store(0, Ordering::Relaxed);
        self.gated_stops.store(0, Ordering::Relaxed);
        self.module_failures.store(0, Ordering::Relaxed);
        self.audit_persist_failures.store(0, Ordering::Relaxed);
    }
}
