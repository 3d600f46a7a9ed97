//! Reproducibility record: an append-only event log, one environment
//! snapshot, and the stores it is persisted through.

pub mod entry;
pub mod environment;
pub mod fakes;
pub mod store;
pub mod trail;

pub use entry::{AuditEntry, AuditEvent, AuditRecord, EventKind, ReproducibilityReport};
pub use environment::{AcceleratorInfo, EnvironmentSnapshot};
pub use store::{AuditStore, FsAuditStore};
pub use trail::{AuditOptions, AuditTrail};
