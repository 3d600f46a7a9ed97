//! Whole-batch outcome and its summary statistics.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use etrial_core::{Decision, PipelineResult};

use crate::stage::{FunnelStage, StageResult};
use crate::FunnelMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub mode: FunnelMode,
    pub stages: Vec<StageResult>,
    /// Results of the last stage that ran.
    pub final_results: Vec<PipelineResult>,
    /// Pass rate of the last stage that ran.
    pub final_pass_rate: f64,
    pub total_runtime_seconds: f64,
}

impl BatchResult {
    pub fn stage(&self, stage: FunnelStage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Final results that were not killed.
    pub fn survivors(&self) -> Vec<&PipelineResult> {
        self.final_results
            .iter()
            .filter(|r| r.overall_decision != Decision::Kill)
            .collect()
    }

    pub fn statistics(&self) -> BatchStatistics {
        BatchStatistics {
            mode: self.mode,
            total_runtime_seconds: self.total_runtime_seconds,
            stages: self
                .stages
                .iter()
                .map(|s| StageStatistics {
                    stage: s.stage,
                    candidates_in: s.candidates_in,
                    candidates_out: s.candidates_out,
                    pass_rate: s.pass_rate,
                    runtime_seconds: s.runtime_seconds,
                    throughput_per_second: s.throughput_per_second(),
                    failures: s.failures.len(),
                })
                .collect(),
            final_decisions: DecisionBreakdown::from_results(&self.final_results),
        }
    }

    /// Write the full batch result as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("serialize batch result")?;
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
        }
        std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageStatistics {
    pub stage: FunnelStage,
    pub candidates_in: usize,
    pub candidates_out: usize,
    pub pass_rate: f64,
    pub runtime_seconds: f64,
    pub throughput_per_second: f64,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionBreakdown {
    #[serde(rename = "PASS")]
    pub pass: usize,
    #[serde(rename = "REVISE")]
    pub revise: usize,
    #[serde(rename = "KILL")]
    pub kill: usize,
}

impl DecisionBreakdown {
    pub fn from_results(results: &[PipelineResult]) -> Self {
        let mut breakdown = Self::default();
        for r in results {
            match r.overall_decision {
                Decision::Pass => breakdown.pass += 1,
                Decision::Revise => breakdown.revise += 1,
                Decision::Kill => breakdown.kill += 1,
                Decision::Informative => {}
            }
        }
        breakdown
    }

    pub fn total(&self) -> usize {
        self.pass + self.revise + self.kill
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStatistics {
    pub mode: FunnelMode,
    pub total_runtime_seconds: f64,
    pub stages: Vec<StageStatistics>,
    pub final_decisions: DecisionBreakdown,
}
