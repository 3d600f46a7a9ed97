//! Per-stage outcome types.

use serde::{Deserialize, Serialize};
use std::fmt;

use etrial_core::{CandidateHash, Decision, PipelineResult};

/// Which pipeline a stage ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunnelStage {
    Prefilter,
    Clinical,
}

impl FunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::Prefilter => "prefilter",
            FunnelStage::Clinical => "clinical",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate skipped because its validation failed (isolation mode only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateFailure {
    pub candidate: String,
    pub candidate_hash: CandidateHash,
    /// Module that raised, when the failure came from a module.
    pub module: Option<String>,
    pub error: String,
}

/// Outcome of one stage over its input population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: FunnelStage,
    pub candidates_in: usize,
    /// Results whose overall decision is not KILL.
    pub candidates_out: usize,
    /// `candidates_out / candidates_in`; 0 for an empty stage.
    pub pass_rate: f64,
    pub runtime_seconds: f64,
    /// Per-candidate results in input order (failed candidates omitted).
    pub results: Vec<PipelineResult>,
    #[serde(default)]
    pub failures: Vec<CandidateFailure>,
}

impl StageResult {
    pub fn empty(stage: FunnelStage) -> Self {
        Self {
            stage,
            candidates_in: 0,
            candidates_out: 0,
            pass_rate: 0.0,
            runtime_seconds: 0.0,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn from_outcomes(
        stage: FunnelStage,
        candidates_in: usize,
        results: Vec<PipelineResult>,
        failures: Vec<CandidateFailure>,
        runtime_seconds: f64,
    ) -> Self {
        let candidates_out = results
            .iter()
            .filter(|r| r.overall_decision != Decision::Kill)
            .count();
        let pass_rate = if candidates_in == 0 {
            0.0
        } else {
            candidates_out as f64 / candidates_in as f64
        };
        Self {
            stage,
            candidates_in,
            candidates_out,
            pass_rate,
            runtime_seconds,
            results,
            failures,
        }
    }

    /// Results that move on to the next stage.
    pub fn survivors(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results
            .iter()
            .filter(|r| r.overall_decision != Decision::Kill)
    }

    /// Candidates processed per second; 0 when no time elapsed.
    pub fn throughput_per_second(&self) -> f64 {
        if self.runtime_seconds > 0.0 {
            self.candidates_in as f64 / self.runtime_seconds
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stage_has_zero_pass_rate() {
        let s = StageResult::from_outcomes(FunnelStage::Clinical, 0, Vec::new(), Vec::new(), 0.0);
        assert_eq!(s.pass_rate, 0.0);
        assert_eq!(s.throughput_per_second(), 0.0);
        assert_eq!(s, StageResult::empty(FunnelStage::Clinical));
    }

    #[test]
    fn stage_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FunnelStage::Prefilter).expect("serialize"),
            "\"prefilter\""
        );
    }
}
