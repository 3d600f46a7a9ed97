//! Passive value types shared by every layer of the screening core.

pub mod candidate;
pub mod decision;
pub mod metric;
pub mod result;

pub use candidate::{Candidate, CandidateHash, Modality};
pub use decision::Decision;
pub use metric::{MetricResult, MetricValue, TierRule, TierThresholds};
pub use result::{reduce_metric_decisions, PipelineResult, ValidationResult};
