//! Threshold Evaluator
//!
//! Compares numeric readings against the configured rule table and
//! synthesizes alerts. Evaluation is pure; the same event and rule table
//! always yield the same alerts.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use smallvec::SmallVec;

pub use crate::config::{Severity, ThresholdRule};

use crate::decode::{DecodedEvent, MetricType};


/// Which side of a rule was crossed
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "limit", rename_all = "lowercase")]
pub enum Violation {
    Below(f64),
    Above(f64),
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Below(min) => write!(f, "below minimum {}", min),
            Violation::Above(max) => write!(f, "above maximum {}", max),
        }
    }
}

/// Alert synthesized from a reading outside its bounds
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub entity_id: String,
    pub metric: MetricType,
    pub observed_value: f64,
    pub violation: Violation,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub severity: Severity,
    pub alert_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Alerts from one event; almost always zero or one
pub type Alerts = SmallVec<[AlertEvent; 2]>;

/// Rule table indexed by metric
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    rules: AHashMap<MetricType, Vec<ThresholdRule>>,
}

impl ThresholdEvaluator {
    pub fn new(rules: impl IntoIterator<Item = ThresholdRule>) -> Self {
        let mut indexed: AHashMap<MetricType, Vec<ThresholdRule>> = AHashMap::new();
        for rule in rules {
            indexed.entry(rule.metric).or_default().push(rule);
        }
        Self { rules: indexed }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Check a decoded event. Events without a numeric reading never alert.
    pub fn evaluate(&self, event: &DecodedEvent) -> Alerts {
        let mut alerts = Alerts::new();

        let (metric, value) = match event.reading() {
            Some(reading) => reading,
            None => return alerts,
        };
        let rules = match self.rules.get(&metric) {
            Some(rules) => rules,
            None => return alerts,
        };

        for rule in rules {
            if let Some(violation) = check(rule, value) {
                alerts.push(AlertEvent {
                    entity_id: event.entity_id.clone(),
                    metric,
                    observed_value: value,
                    violation,
                    min: rule.min,
                    max: rule.max,
                    severity: rule.severity,
                    alert_type: rule.alert_type.clone(),
                    message: format!("{} {} on {} is {}", metric, value, event.entity_id, violation),
                    created_at: event.timestamp,
                });
            }
        }

        alerts
    }
}

/// Bounds are inclusive: a value equal to min or max is in range
fn check(rule: &ThresholdRule, value: f64) -> Option<Violation> {
    if let Some(min) = rule.min {
        if value < min {
            return Some(Violation::Below(min));
        }
    }
    if let Some(max) = rule.max {
        if value > max {
            return Some(Violation::Above(max));
        }
    }
    None
}
