//! eTrial two-stage funnel
//!
//! Screens a batch through a cheap broad prefilter pipeline, then runs the
//! survivors through an expensive clinical pipeline. Each stage validates
//! candidates on a bounded worker pool and returns results in input order.

pub mod batch;
pub mod stage;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use etrial_core::{
    obs, Candidate, ConfigError, PipelineError, PipelineResult, Result, ValidateOptions,
    ValidationPipeline,
};

pub use batch::{BatchResult, BatchStatistics, DecisionBreakdown, StageStatistics};
pub use stage::{CandidateFailure, FunnelStage, StageResult};

/// Progress is logged every this many candidates.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Which stages a batch runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FunnelMode {
    Prefilter,
    Clinical,
    #[default]
    Both,
}

impl FunnelMode {
    pub fn runs_prefilter(&self) -> bool {
        matches!(self, FunnelMode::Prefilter | FunnelMode::Both)
    }

    pub fn runs_clinical(&self) -> bool {
        matches!(self, FunnelMode::Clinical | FunnelMode::Both)
    }
}

impl fmt::Display for FunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FunnelMode::Prefilter => "prefilter",
            FunnelMode::Clinical => "clinical",
            FunnelMode::Both => "both",
        })
    }
}

impl FromStr for FunnelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefilter" => Ok(FunnelMode::Prefilter),
            "clinical" => Ok(FunnelMode::Clinical),
            "both" => Ok(FunnelMode::Both),
            other => Err(format!("unknown funnel mode: {other}")),
        }
    }
}

/// Batch execution options.
#[derive(Debug, Clone)]
pub struct FunnelOptions {
    /// Candidates validated concurrently within a stage; 1 is sequential.
    pub max_concurrency: usize,
    /// Record failing candidates and keep going instead of aborting.
    pub isolate_failures: bool,
    pub progress_interval: usize,
}

impl Default for FunnelOptions {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            isolate_failures: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl FunnelOptions {
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Self::default()
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn isolate_failures(mut self, isolate: bool) -> Self {
        self.isolate_failures = isolate;
        self
    }
}

enum Outcome {
    Validated(PipelineResult),
    Skipped(CandidateFailure),
}

/// Prefilter → clinical batch funnel over two independently configured
/// pipelines.
pub struct TwoStageValidationPipeline {
    mode: FunnelMode,
    prefilter: Option<Arc<ValidationPipeline>>,
    clinical: Option<Arc<ValidationPipeline>>,
    options: FunnelOptions,
    cancel: CancellationToken,
}

impl TwoStageValidationPipeline {
    /// Every stage the mode runs needs its pipeline.
    pub fn new(
        mode: FunnelMode,
        prefilter: Option<Arc<ValidationPipeline>>,
        clinical: Option<Arc<ValidationPipeline>>,
    ) -> Result<Self> {
        if mode.runs_prefilter() && prefilter.is_none() {
            return Err(ConfigError::Invalid(format!("{mode} mode needs a prefilter pipeline")).into());
        }
        if mode.runs_clinical() && clinical.is_none() {
            return Err(ConfigError::Invalid(format!("{mode} mode needs a clinical pipeline")).into());
        }
        info!(mode = %mode, "two-stage pipeline initialized");
        Ok(Self {
            mode,
            prefilter,
            clinical,
            options: FunnelOptions::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_options(mut self, options: FunnelOptions) -> Self {
        self.options = options;
        self
    }

    /// Width derived from the clinical (else prefilter) config's `n_jobs`.
    pub fn with_config_concurrency(mut self) -> Self {
        let pipeline = self.clinical.as_ref().or(self.prefilter.as_ref());
        if let Some(p) = pipeline {
            self.options.max_concurrency = p.config().max_concurrency().max(1);
        }
        self
    }

    pub fn mode(&self) -> FunnelMode {
        self.mode
    }

    pub fn options(&self) -> &FunnelOptions {
        &self.options
    }

    pub fn prefilter(&self) -> Option<&Arc<ValidationPipeline>> {
        self.prefilter.as_ref()
    }

    pub fn clinical(&self) -> Option<&Arc<ValidationPipeline>> {
        self.clinical.as_ref()
    }

    /// Token that cancels in-progress and future batches. Candidates already
    /// running finish; no new candidate starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the batch through the stages of the configured mode.
    ///
    /// A KILL never ends the batch early. A candidate error aborts the
    /// batch unless `isolate_failures` is set.
    pub async fn validate_batch(&self, candidates: &[Candidate]) -> Result<BatchResult> {
        let start = Instant::now();
        let mut stages = Vec::new();

        let clinical_input: Vec<Candidate> = match (&self.prefilter, self.mode.runs_prefilter()) {
            (Some(prefilter), true) => {
                let stage1 = self
                    .run_stage(FunnelStage::Prefilter, prefilter, candidates)
                    .await?;
                let survivors: Vec<Candidate> =
                    stage1.survivors().map(|r| r.candidate.clone()).collect();
                info!(
                    stage = "prefilter",
                    candidates_in = candidates.len(),
                    survivors = survivors.len(),
                    "prefilter complete"
                );
                stages.push(stage1);

                if !self.mode.runs_clinical() {
                    return Ok(self.finish(stages, start));
                }
                survivors
            }
            _ => candidates.to_vec(),
        };

        if let (Some(clinical), true) = (&self.clinical, self.mode.runs_clinical()) {
            let stage2 = self
                .run_stage(FunnelStage::Clinical, clinical, &clinical_input)
                .await?;
            stages.push(stage2);
        }

        Ok(self.finish(stages, start))
    }

    fn finish(&self, stages: Vec<StageResult>, start: Instant) -> BatchResult {
        let (final_results, final_pass_rate) = stages
            .last()
            .map(|s| (s.results.clone(), s.pass_rate))
            .unwrap_or_default();
        let total_runtime_seconds = start.elapsed().as_secs_f64();
        info!(
            mode = %self.mode,
            final_candidates = final_results.len(),
            final_pass_rate = final_pass_rate,
            runtime_seconds = total_runtime_seconds,
            "batch complete"
        );
        etrial_core::metrics::METRICS.flush();
        BatchResult {
            mode: self.mode,
            stages,
            final_results,
            final_pass_rate,
            total_runtime_seconds,
        }
    }

    async fn run_stage(
        &self,
        stage: FunnelStage,
        pipeline: &ValidationPipeline,
        candidates: &[Candidate],
    ) -> Result<StageResult> {
        let total = candidates.len();
        if total == 0 {
            obs::emit_stage_completed(stage.as_str(), 0, 0, 0.0, 0);
            return Ok(StageResult::empty(stage));
        }

        let start = Instant::now();
        let done = AtomicUsize::new(0);
        let interval = self.options.progress_interval.max(1);
        let isolate = self.options.isolate_failures;

        let outcomes: Vec<Outcome> = stream::iter(candidates.iter())
            .map(|candidate| {
                let done = &done;
                async move {
                    if self.cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    let outcome = pipeline
                        .validate(candidate, ValidateOptions::default())
                        .await;

                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % interval == 0 {
                        obs::emit_stage_progress(stage.as_str(), n, total);
                    }

                    match outcome {
                        Ok(result) => Ok(Outcome::Validated(result)),
                        Err(err) if isolate && !matches!(err, PipelineError::Cancelled) => {
                            obs::emit_candidate_skipped(stage.as_str(), &candidate.name, &err);
                            Ok(Outcome::Skipped(CandidateFailure {
                                candidate: candidate.name.clone(),
                                candidate_hash: candidate.hash(),
                                module: err.module().map(str::to_string),
                                error: err.to_string(),
                            }))
                        }
                        Err(err) => Err(err),
                    }
                }
            })
            .buffered(self.options.max_concurrency.max(1))
            .try_collect()
            .await?;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Validated(r) => results.push(r),
                Outcome::Skipped(f) => failures.push(f),
            }
        }

        let stage_result = StageResult::from_outcomes(
            stage,
            total,
            results,
            failures,
            start.elapsed().as_secs_f64(),
        );
        obs::emit_stage_completed(
            stage.as_str(),
            stage_result.candidates_in,
            stage_result.candidates_out,
            stage_result.pass_rate,
            start.elapsed().as_millis() as u64,
        );
        Ok(stage_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_and_flags() {
        assert_eq!("Both".parse::<FunnelMode>(), Ok(FunnelMode::Both));
        assert!("stage3".parse::<FunnelMode>().is_err());
        assert!(FunnelMode::Prefilter.runs_prefilter());
        assert!(!FunnelMode::Prefilter.runs_clinical());
        assert!(!FunnelMode::Clinical.runs_prefilter());
        assert_eq!(FunnelMode::default(), FunnelMode::Both);
    }

    #[test]
    fn options_clamp_concurrency() {
        let o = FunnelOptions::default().with_max_concurrency(0);
        assert_eq!(o.max_concurrency, 1);
        assert_eq!(FunnelOptions::sequential().max_concurrency, 1);
        assert!(!FunnelOptions::default().isolate_failures);
    }
}
