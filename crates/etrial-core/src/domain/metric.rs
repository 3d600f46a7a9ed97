//! Metric values, tier rules and per-metric results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::decision::Decision;

/// Raw value a module reports for a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
}

impl MetricValue {
    /// Numeric view used by range rules. Booleans count as 1/0; text,
    /// missing values and NaN have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(f) if !f.is_nan() => Some(*f),
            MetricValue::Float(_) => None,
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(_) | MetricValue::Missing => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::Missing => f.write_str("n/a"),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// Rule for one tier: an inclusive `[min, max]` range (either bound may be
/// open) or an exact boolean match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TierRule {
    Exact(bool),
    Range(Option<f64>, Option<f64>),
}

impl TierRule {
    /// Parse one tier definition; anything unrecognized yields `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(TierRule::Exact(*b)),
            serde_json::Value::Array(bounds) if bounds.len() == 2 => {
                let bound = |v: &serde_json::Value| -> Option<Option<f64>> {
                    match v {
                        serde_json::Value::Null => Some(None),
                        serde_json::Value::Number(n) => n.as_f64().map(Some),
                        _ => None,
                    }
                };
                Some(TierRule::Range(bound(&bounds[0])?, bound(&bounds[1])?))
            }
            _ => None,
        }
    }

    pub fn matches(&self, value: &MetricValue) -> bool {
        match self {
            TierRule::Exact(expected) => match value {
                MetricValue::Bool(b) => b == expected,
                other => other
                    .as_f64()
                    .map(|x| x == if *expected { 1.0 } else { 0.0 })
                    .unwrap_or(false),
            },
            TierRule::Range(min, max) => {
                let Some(x) = value.as_f64() else {
                    return false;
                };
                if matches!(min, Some(lo) if x < *lo) {
                    return false;
                }
                if matches!(max, Some(hi) if x > *hi) {
                    return false;
                }
                true
            }
        }
    }
}

/// The PASS / REVISE / KILL rules configured for one metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TierThresholds {
    #[serde(rename = "PASS", default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<TierRule>,
    #[serde(rename = "REVISE", default, skip_serializing_if = "Option::is_none")]
    pub revise: Option<TierRule>,
    #[serde(rename = "KILL", default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<TierRule>,
}

impl TierThresholds {
    /// Parse a metric's tier map. Tier keys are matched case-insensitively;
    /// malformed tiers are dropped. Returns `None` when no tier survives.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut tiers = TierThresholds::default();
        for (key, rule) in map {
            let Some(rule) = TierRule::from_value(rule) else {
                continue;
            };
            match key.to_ascii_uppercase().as_str() {
                "PASS" => tiers.pass = Some(rule),
                "REVISE" => tiers.revise = Some(rule),
                "KILL" => tiers.kill = Some(rule),
                _ => {}
            }
        }
        if tiers.is_empty() {
            None
        } else {
            Some(tiers)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pass.is_none() && self.revise.is_none() && self.kill.is_none()
    }

    fn rule(&self, tier: Decision) -> Option<&TierRule> {
        match tier {
            Decision::Pass => self.pass.as_ref(),
            Decision::Revise => self.revise.as_ref(),
            Decision::Kill => self.kill.as_ref(),
            Decision::Informative => None,
        }
    }

    /// Evaluate KILL, then REVISE, then PASS; the first matching tier wins.
    /// Overlapping ranges therefore resolve toward the more severe tier.
    pub fn evaluate(&self, value: &MetricValue) -> Decision {
        Decision::GATING_PRIORITY
            .into_iter()
            .find(|tier| self.rule(*tier).is_some_and(|rule| rule.matches(value)))
            .unwrap_or(Decision::Informative)
    }
}

/// One metric computed by a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResult {
    pub name: String,
    pub value: MetricValue,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub thresholds: Option<TierThresholds>,
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MetricResult {
    pub fn new(name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unit: None,
            thresholds: None,
            decision: None,
            confidence: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach tier rules and resolve the decision from them.
    pub fn with_thresholds(mut self, thresholds: TierThresholds) -> Self {
        self.decision = Some(thresholds.evaluate(&self.value));
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    /// Confidence is clamped into `[0, 1]`; NaN is dropped.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            None
        } else {
            Some(confidence.clamp(0.0, 1.0))
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Resolved tier, INFORMATIVE when none was resolved.
    pub fn tier(&self) -> Decision {
        self.decision.unwrap_or(Decision::Informative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hydrophobicity() -> TierThresholds {
        TierThresholds::from_value(&json!({
            "PASS": [null, 0.35],
            "REVISE": [0.35, 0.45],
            "KILL": [0.45, null],
        }))
        .expect("valid tiers")
    }

    #[test]
    fn boundary_values_resolve_to_more_severe_tier() {
        let tiers = hydrophobicity();
        assert_eq!(tiers.evaluate(&MetricValue::Float(0.2)), Decision::Pass);
        assert_eq!(tiers.evaluate(&MetricValue::Float(0.35)), Decision::Revise);
        assert_eq!(tiers.evaluate(&MetricValue::Float(0.45)), Decision::Kill);
        assert_eq!(tiers.evaluate(&MetricValue::Float(0.9)), Decision::Kill);
    }

    #[test]
    fn non_numeric_values_are_informative() {
        let tiers = hydrophobicity();
        assert_eq!(
            tiers.evaluate(&MetricValue::Text("high".into())),
            Decision::Informative
        );
        assert_eq!(tiers.evaluate(&MetricValue::Missing), Decision::Informative);
        assert_eq!(
            tiers.evaluate(&MetricValue::Float(f64::NAN)),
            Decision::Informative
        );
    }

    #[test]
    fn boolean_rule_matches_exactly() {
        let tiers = TierThresholds::from_value(&json!({ "KILL": true, "PASS": false }))
            .expect("valid tiers");
        assert_eq!(tiers.evaluate(&MetricValue::Bool(true)), Decision::Kill);
        assert_eq!(tiers.evaluate(&MetricValue::Bool(false)), Decision::Pass);
        assert_eq!(tiers.evaluate(&MetricValue::Int(1)), Decision::Kill);
        assert_eq!(tiers.evaluate(&MetricValue::Int(7)), Decision::Informative);
    }

    #[test]
    fn malformed_tiers_are_dropped() {
        assert!(TierThresholds::from_value(&json!({ "KILL": [1, 2, 3] })).is_none());
        assert!(TierThresholds::from_value(&json!({ "KILL": "high" })).is_none());
        assert!(TierThresholds::from_value(&json!(42)).is_none());

        let partial = TierThresholds::from_value(&json!({ "KILL": ["x", 2], "pass": [0, 1] }))
            .expect("pass tier survives");
        assert!(partial.kill.is_none());
        assert_eq!(partial.evaluate(&MetricValue::Int(1)), Decision::Pass);
    }

    #[test]
    fn metric_value_untagged_serde() {
        let values = vec![
            MetricValue::Bool(true),
            MetricValue::Int(3),
            MetricValue::Float(0.25),
            MetricValue::Text("CDR-H3".into()),
            MetricValue::Missing,
        ];
        let json = serde_json::to_string(&values).expect("serialize");
        assert_eq!(json, r#"[true,3,0.25,"CDR-H3",null]"#);
        let back: Vec<MetricValue> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, values);
    }

    #[test]
    fn with_thresholds_resolves_decision_and_confidence_is_clamped() {
        let metric = MetricResult::new("hydrophobic_fraction", 0.5)
            .with_thresholds(hydrophobicity())
            .with_confidence(1.7);
        assert_eq!(metric.tier(), Decision::Kill);
        assert_eq!(metric.confidence, Some(1.0));
        assert_eq!(MetricResult::new("n", 1i64).tier(), Decision::Informative);
    }
}
