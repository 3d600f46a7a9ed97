//! Threshold tree: per-metric tier resolution and the module → pipeline
//! decision reduction.
//!
//! The tree is read-only after load. Lookups never fail: a missing module,
//! metric or malformed subtree resolves to INFORMATIVE, so absent domain
//! configuration cannot break a batch run.

use serde_json::{Map, Value};
use std::path::Path;

use crate::config::normalize_module_name;
use crate::domain::{Decision, MetricResult, MetricValue, TierThresholds};
use crate::error::ConfigError;

/// Default tolerance for REVISE modules before the overall decision
/// escalates to KILL (`count(REVISE) > max_kill_modules`).
pub const DEFAULT_MAX_KILL_MODULES: usize = 3;

const GATES_KEY: &str = "gates";
const DECISION_KEY: &str = "decision";

/// Resolver over a parsed threshold tree.
#[derive(Debug, Clone, Default)]
pub struct ThresholdManager {
    tree: Map<String, Value>,
}

impl ThresholdManager {
    /// Wrap an already parsed tree. A non-object root is treated as empty.
    pub fn new(tree: Value) -> Self {
        match tree {
            Value::Object(tree) => Self { tree },
            other => {
                if !other.is_null() {
                    tracing::warn!("threshold tree root is not a mapping; ignoring it");
                }
                Self::default()
            }
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<inline>"))
    }

    /// Load a YAML (or JSON) threshold document. Only an unreadable file or
    /// a syntactically invalid document is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let tree: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::new(tree))
    }

    pub fn tree(&self) -> &Map<String, Value> {
        &self.tree
    }

    fn lookup(&self, section: &Map<String, Value>, name: &str) -> Option<Value> {
        if let Some(value) = section.get(name) {
            return Some(value.clone());
        }
        let normalized = normalize_module_name(name);
        section
            .iter()
            .find(|(key, _)| normalize_module_name(key) == normalized)
            .map(|(_, value)| value.clone())
    }

    /// Threshold mapping for a module. Empty means "no gating".
    pub fn module_thresholds(&self, module: &str) -> Map<String, Value> {
        match self.lookup(&self.tree, module) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn has_module_thresholds(&self, module: &str) -> bool {
        !self.module_thresholds(module).is_empty()
    }

    /// Tier rules for one metric: directly under the module, or one section
    /// level below it.
    pub fn metric_thresholds(&self, module: &str, metric: &str) -> Option<TierThresholds> {
        let module_tree = self.module_thresholds(module);

        if let Some(direct) = module_tree.get(metric) {
            if let Some(tiers) = TierThresholds::from_value(direct) {
                return Some(tiers);
            }
        }

        module_tree
            .values()
            .filter_map(Value::as_object)
            .filter_map(|section| section.get(metric))
            .find_map(TierThresholds::from_value)
    }

    /// Resolve a metric value to a tier. Total: never fails.
    pub fn apply_threshold(&self, module: &str, metric: &str, value: &MetricValue) -> Decision {
        self.metric_thresholds(module, metric)
            .map(|tiers| tiers.evaluate(value))
            .unwrap_or(Decision::Informative)
    }

    /// Attach the configured tiers to a metric and resolve its decision.
    /// Metrics without configured tiers come back INFORMATIVE.
    pub fn resolve_metric(&self, module: &str, metric: MetricResult) -> MetricResult {
        match self.metric_thresholds(module, &metric.name) {
            Some(tiers) => metric.with_thresholds(tiers),
            None => metric.with_decision(Decision::Informative),
        }
    }

    /// `decision.max_kill_modules`, also accepted as
    /// `decision.REVISE.max_kill_modules`.
    pub fn max_kill_modules(&self) -> usize {
        let Some(Value::Object(decision)) = self.tree.get(DECISION_KEY) else {
            return DEFAULT_MAX_KILL_MODULES;
        };
        decision
            .get("max_kill_modules")
            .or_else(|| {
                decision
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("revise"))
                    .and_then(|(_, v)| v.get("max_kill_modules"))
            })
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_KILL_MODULES)
    }

    /// Reduce module decisions to one pipeline decision.
    ///
    /// Any KILL ⇒ KILL; more than `max_kill_modules` REVISE ⇒ KILL; any
    /// REVISE ⇒ REVISE; otherwise PASS. INFORMATIVE is neutral.
    pub fn overall_decision<I>(&self, decisions: I) -> Decision
    where
        I: IntoIterator<Item = Decision>,
    {
        let mut revise_count = 0usize;
        for decision in decisions {
            match decision {
                Decision::Kill => return Decision::Kill,
                Decision::Revise => revise_count += 1,
                Decision::Pass | Decision::Informative => {}
            }
        }

        if revise_count > self.max_kill_modules() {
            Decision::Kill
        } else if revise_count > 0 {
            Decision::Revise
        } else {
            Decision::Pass
        }
    }

    /// `gates.<module>.fail_stops_pipeline`; false when absent.
    pub fn fail_stops_pipeline(&self, module: &str) -> bool {
        let Some(Value::Object(gates)) = self.tree.get(GATES_KEY) else {
            return false;
        };
        self.lookup(gates, module)
            .and_then(|gate| gate.get("fail_stops_pipeline").and_then(Value::as_bool))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const THRESHOLDS: &str = r#"
solubility:
  sequence:
    hydrophobic_fraction:
      PASS: [null, 0.35]
      REVISE: [0.35, 0.45]
      KILL: [0.45, null]
  has_free_cysteine:
    KILL: true
    PASS: false
Safety-Screen:
  pains_alerts:
    KILL: [1, null]
    PASS: [0, 0]
broken:
  metric: "not a tier map"
gates:
  structure:
    fail_stops_pipeline: true
  safety:
    fail_stops_pipeline: false
decision:
  max_kill_modules: 2
"#;

    fn manager() -> ThresholdManager {
        ThresholdManager::from_yaml_str(THRESHOLDS).expect("parse thresholds")
    }

    #[test]
    fn nested_section_metric_resolves() {
        let tm = manager();
        assert_eq!(
            tm.apply_threshold("solubility", "hydrophobic_fraction", &MetricValue::Float(0.5)),
            Decision::Kill
        );
        assert_eq!(
            tm.apply_threshold("solubility", "hydrophobic_fraction", &MetricValue::Float(0.1)),
            Decision::Pass
        );
    }

    #[test]
    fn direct_boolean_metric_resolves() {
        let tm = manager();
        assert_eq!(
            tm.apply_threshold("solubility", "has_free_cysteine", &MetricValue::Bool(true)),
            Decision::Kill
        );
        assert_eq!(
            tm.apply_threshold("solubility", "has_free_cysteine", &MetricValue::Bool(false)),
            Decision::Pass
        );
    }

    #[test]
    fn module_lookup_is_normalized() {
        let tm = manager();
        assert!(tm.has_module_thresholds("safety_screen"));
        assert!(tm.has_module_thresholds("SAFETY SCREEN"));
        assert_eq!(
            tm.apply_threshold("safety-screen", "pains_alerts", &MetricValue::Int(2)),
            Decision::Kill
        );
    }

    #[test]
    fn missing_or_malformed_degrades_to_informative() {
        let tm = manager();
        assert!(tm.module_thresholds("unknown").is_empty());
        assert_eq!(
            tm.apply_threshold("unknown", "x", &MetricValue::Float(1.0)),
            Decision::Informative
        );
        assert_eq!(
            tm.apply_threshold("broken", "metric", &MetricValue::Float(1.0)),
            Decision::Informative
        );
        assert_eq!(
            tm.apply_threshold("solubility", "hydrophobic_fraction", &MetricValue::Missing),
            Decision::Informative
        );
    }

    #[test]
    fn non_mapping_root_is_empty() {
        let tm = ThresholdManager::new(json!([1, 2, 3]));
        assert!(tm.tree().is_empty());
        assert_eq!(tm.max_kill_modules(), DEFAULT_MAX_KILL_MODULES);
    }

    #[test]
    fn overall_decision_rule() {
        let tm = manager();
        use Decision::*;
        assert_eq!(tm.overall_decision([Pass, Pass]), Pass);
        assert_eq!(tm.overall_decision([Pass, Revise]), Revise);
        assert_eq!(tm.overall_decision([Revise, Revise]), Revise);
        assert_eq!(tm.overall_decision([Revise, Revise, Revise]), Kill);
        assert_eq!(tm.overall_decision([Pass, Kill, Informative]), Kill);
        assert_eq!(tm.overall_decision([Informative]), Pass);
        assert_eq!(tm.overall_decision(Vec::new()), Pass);
    }

    #[test]
    fn default_max_kill_modules_is_three() {
        let tm = ThresholdManager::default();
        use Decision::*;
        assert_eq!(tm.overall_decision([Revise, Revise, Revise]), Revise);
        assert_eq!(tm.overall_decision([Revise, Revise, Revise, Revise]), Kill);
    }

    #[test]
    fn max_kill_modules_under_revise_section() {
        let tm = ThresholdManager::new(json!({ "decision": { "REVISE": { "max_kill_modules": 1 } } }));
        assert_eq!(tm.max_kill_modules(), 1);
        use Decision::*;
        assert_eq!(tm.overall_decision([Revise, Revise]), Kill);
    }

    #[test]
    fn gates_lookup() {
        let tm = manager();
        assert!(tm.fail_stops_pipeline("structure"));
        assert!(!tm.fail_stops_pipeline("safety"));
        assert!(!tm.fail_stops_pipeline("specificity"));
    }

    #[test]
    fn resolve_metric_attaches_tiers() {
        let tm = manager();
        let metric = tm.resolve_metric(
            "solubility",
            MetricResult::new("hydrophobic_fraction", 0.4).with_unit("fraction"),
        );
        assert_eq!(metric.tier(), Decision::Revise);
        assert!(metric.thresholds.is_some());

        let unknown = tm.resolve_metric("solubility", MetricResult::new("charge", 3.0));
        assert_eq!(unknown.decision, Some(Decision::Informative));
    }

    #[test]
    fn invalid_yaml_is_configuration_error() {
        assert!(ThresholdManager::from_yaml_str("a: [1, 2").is_err());
        assert!(ThresholdManager::from_yaml_str("   ").expect("empty").tree().is_empty());
    }
}
