//! Structured observability hooks for the screening lifecycle.
//!
//! - `CandidateSpan`: RAII guard tagging every log line with the candidate
//! - `emit_*`: one function per lifecycle event
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filtering is
//! controlled through `RUST_LOG` (see [`crate::telemetry::init_tracing`]).

use tracing::{info, warn};

use crate::domain::Decision;

/// RAII guard that enters a candidate-scoped span.
///
/// ```ignore
/// let _span = CandidateSpan::enter("AB-001", "3f9a0c1b2d4e5f60");
/// ```
pub struct CandidateSpan {
    _span: tracing::span::EnteredSpan,
}

impl CandidateSpan {
    pub fn enter(candidate: &str, candidate_hash: &str) -> Self {
        let span = tracing::info_span!(
            "etrial.candidate",
            candidate = %candidate,
            candidate_hash = %candidate_hash,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Build (without entering) the candidate span, for `Instrument`-style use
/// across await points.
pub fn candidate_span(candidate: &str, candidate_hash: &str) -> tracing::Span {
    tracing::info_span!(
        "etrial.candidate",
        candidate = %candidate,
        candidate_hash = %candidate_hash,
    )
}

pub fn emit_validation_started(candidate: &str, modality: &str, modules: usize) {
    info!(
        event = "validation.started",
        candidate = %candidate,
        modality = %modality,
        modules = modules,
    );
}

pub fn emit_module_completed(candidate: &str, module: &str, decision: Decision, runtime_ms: u64) {
    info!(
        event = "module.completed",
        candidate = %candidate,
        module = %module,
        decision = %decision,
        runtime_ms = runtime_ms,
    );
}

pub fn emit_module_failed(candidate: &str, module: &str, error: &dyn std::fmt::Display) {
    warn!(event = "module.failed", candidate = %candidate, module = %module, error = %error);
}

/// A critical module returned KILL and the remaining modules were skipped.
pub fn emit_pipeline_gated(candidate: &str, module: &str, skipped: usize) {
    info!(
        event = "pipeline.gated",
        candidate = %candidate,
        module = %module,
        skipped = skipped,
    );
}

pub fn emit_validation_completed(
    candidate: &str,
    decision: Decision,
    runtime_ms: u64,
    modules_run: usize,
) {
    info!(
        event = "validation.completed",
        candidate = %candidate,
        decision = %decision,
        runtime_ms = runtime_ms,
        modules_run = modules_run,
    );
}

pub fn emit_stage_progress(stage: &str, done: usize, total: usize) {
    info!(event = "stage.progress", stage = %stage, done = done, total = total);
}

pub fn emit_stage_completed(
    stage: &str,
    candidates_in: usize,
    candidates_out: usize,
    pass_rate: f64,
    runtime_ms: u64,
) {
    info!(
        event = "stage.completed",
        stage = %stage,
        candidates_in = candidates_in,
        candidates_out = candidates_out,
        pass_rate = pass_rate,
        runtime_ms = runtime_ms,
    );
}

pub fn emit_candidate_skipped(stage: &str, candidate: &str, error: &dyn std::fmt::Display) {
    warn!(event = "stage.candidate_skipped", stage = %stage, candidate = %candidate, error = %error);
}

pub fn emit_audit_persist_failed(trail_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.persist_failed", trail_id = %trail_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_span_create() {
        let _span = CandidateSpan::enter("AB-001", "0123456789abcdef");
        emit_module_completed("AB-001", "structure", Decision::Pass, 12);
    }
}
