//! Module-level and pipeline-level results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::candidate::{Candidate, CandidateHash};
use super::decision::Decision;
use super::metric::{MetricResult, MetricValue};

/// Default module-level reduction: the most severe gating tier among the
/// metrics, or INFORMATIVE when no metric carries a gating tier.
pub fn reduce_metric_decisions(metrics: &[MetricResult]) -> Decision {
    metrics
        .iter()
        .map(MetricResult::tier)
        .filter(Decision::is_gating)
        .reduce(Decision::max_severity)
        .unwrap_or(Decision::Informative)
}

/// Output of one module for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub module_name: String,
    pub module_version: String,
    pub candidate_hash: CandidateHash,
    pub decision: Decision,
    #[serde(default)]
    pub metrics: Vec<MetricResult>,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub runtime_seconds: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ValidationResult {
    pub fn new(
        module_name: impl Into<String>,
        module_version: impl Into<String>,
        candidate: &Candidate,
        decision: Decision,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            module_version: module_version.into(),
            candidate_hash: candidate.hash(),
            decision,
            metrics: Vec::new(),
            summary: summary.into(),
            recommendations: Vec::new(),
            risks: Vec::new(),
            warnings: Vec::new(),
            artifacts: BTreeMap::new(),
            runtime_seconds: None,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Build a result whose decision is [`reduce_metric_decisions`] over
    /// `metrics`.
    pub fn from_metrics(
        module_name: impl Into<String>,
        module_version: impl Into<String>,
        candidate: &Candidate,
        metrics: Vec<MetricResult>,
        summary: impl Into<String>,
    ) -> Self {
        let decision = reduce_metric_decisions(&metrics);
        let mut result = Self::new(module_name, module_version, candidate, decision, summary);
        result.metrics = metrics;
        result
    }

    /// INFORMATIVE outcome for inputs the module does not apply to.
    pub fn not_applicable(
        module_name: impl Into<String>,
        module_version: impl Into<String>,
        candidate: &Candidate,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        Self::new(
            module_name,
            module_version,
            candidate,
            Decision::Informative,
            format!("Not applicable: {reason}"),
        )
        .with_warning(reason)
    }

    pub fn with_metric(mut self, metric: MetricResult) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_recommendation(mut self, text: impl Into<String>) -> Self {
        self.recommendations.push(text.into());
        self
    }

    pub fn with_risk(mut self, text: impl Into<String>) -> Self {
        self.risks.push(text.into());
        self
    }

    pub fn with_warning(mut self, text: impl Into<String>) -> Self {
        self.warnings.push(text.into());
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.insert(name.into(), path.into());
        self
    }

    pub fn with_runtime(mut self, seconds: f64) -> Self {
        self.runtime_seconds = Some(seconds);
        self
    }

    pub fn metric(&self, name: &str) -> Option<&MetricResult> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn metric_value(&self, name: &str) -> Option<&MetricValue> {
        self.metric(name).map(|m| &m.value)
    }
}

/// Complete outcome of one `ValidationPipeline::validate` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub candidate: Candidate,
    pub overall_decision: Decision,
    pub module_results: BTreeMap<String, ValidationResult>,
    /// Modules that actually ran, in order. A strict prefix of the requested
    /// order when a critical module gated the run.
    pub execution_order: Vec<String>,
    /// Critical module whose KILL stopped execution.
    #[serde(default)]
    pub gated_by: Option<String>,
    pub total_runtime_seconds: f64,
    pub timestamp: DateTime<Utc>,
    pub config_hash: String,
    pub audit_trail_id: Option<String>,
}

impl PipelineResult {
    pub fn module_result(&self, module_name: &str) -> Option<&ValidationResult> {
        self.module_results.get(module_name)
    }

    fn modules_with(&self, decision: Decision) -> Vec<String> {
        self.execution_order
            .iter()
            .filter(|name| {
                self.module_results
                    .get(name.as_str())
                    .is_some_and(|r| r.decision == decision)
            })
            .cloned()
            .collect()
    }

    /// Modules that returned KILL, in execution order.
    pub fn failed_modules(&self) -> Vec<String> {
        self.modules_with(Decision::Kill)
    }

    /// Modules that returned REVISE, in execution order.
    pub fn revise_modules(&self) -> Vec<String> {
        self.modules_with(Decision::Revise)
    }

    pub fn was_gated(&self) -> bool {
        self.gated_by.is_some()
    }

    pub fn exit_code(&self) -> i32 {
        self.overall_decision.exit_code()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::Modality;
    use crate::domain::metric::TierThresholds;
    use serde_json::json;

    fn candidate() -> Candidate {
        Candidate::new("PEP-7", Modality::Peptide, "GLP1R").with_sequence("HAEGTFTSDV")
    }

    #[test]
    fn reduce_picks_most_severe_gating_tier() {
        let metrics = vec![
            MetricResult::new("a", 1.0).with_decision(Decision::Pass),
            MetricResult::new("b", 2.0).with_decision(Decision::Revise),
            MetricResult::new("c", 3.0),
        ];
        assert_eq!(reduce_metric_decisions(&metrics), Decision::Revise);
        assert_eq!(reduce_metric_decisions(&[]), Decision::Informative);
        assert_eq!(
            reduce_metric_decisions(&[MetricResult::new("x", 0.1)]),
            Decision::Informative
        );
    }

    #[test]
    fn from_metrics_derives_decision() {
        let tiers = TierThresholds::from_value(&json!({ "KILL": [10, null], "PASS": [null, 10] }))
            .expect("tiers");
        let result = ValidationResult::from_metrics(
            "toxicity",
            "0.2.0",
            &candidate(),
            vec![MetricResult::new("alerts", 12i64).with_thresholds(tiers)],
            "12 structural alerts",
        );
        assert_eq!(result.decision, Decision::Kill);
        assert_eq!(result.metric_value("alerts"), Some(&MetricValue::Int(12)));
        assert!(result.metric("missing").is_none());
        assert_eq!(result.candidate_hash, candidate().hash());
    }

    #[test]
    fn not_applicable_is_informative_with_warning() {
        let result =
            ValidationResult::not_applicable("pkpd", "0.1.0", &candidate(), "no SMILES for peptide");
        assert_eq!(result.decision, Decision::Informative);
        assert_eq!(result.warnings, vec!["no SMILES for peptide".to_string()]);
        assert!(result.summary.starts_with("Not applicable"));
    }
}
