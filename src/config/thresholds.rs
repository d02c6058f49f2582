//! Threshold rule configuration.

use serde::{Deserialize, Serialize};

use crate::decode::MetricType;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_alert_type() -> String {
    "threshold_violation".to_string()
}

/// Bounds for one metric type.
///
/// A value equal to `min` or `max` is in bounds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThresholdRule {
    /// Metric the rule applies to
    pub metric: MetricType,

    /// Lower bound (violated when value < min)
    #[serde(default)]
    pub min: Option<f64>,

    /// Upper bound (violated when value > max)
    #[serde(default)]
    pub max: Option<f64>,

    /// Severity of the synthesized alert
    #[serde(default)]
    pub severity: Severity,

    /// Alert type reported to clients
    #[serde(default = "default_alert_type")]
    pub alert_type: String,
}

impl ThresholdRule {
    pub fn range(metric: MetricType, min: f64, max: f64) -> Self {
        Self {
            metric,
            min: Some(min),
            max: Some(max),
            severity: Severity::default(),
            alert_type: default_alert_type(),
        }
    }

    pub fn below(metric: MetricType, min: f64) -> Self {
        Self {
            max: None,
            ..Self::range(metric, min, min)
        }
    }

    pub fn above(metric: MetricType, max: f64) -> Self {
        Self {
            min: None,
            ..Self::range(metric, max, max)
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_alert_type(mut self, alert_type: impl Into<String>) -> Self {
        self.alert_type = alert_type.into();
        self
    }

    /// Check bounds are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.min.is_none() && self.max.is_none() {
            return Err(format!(
                "threshold for '{}' needs at least one of min/max",
                self.metric
            ));
        }
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(format!("threshold for '{}' has a non-finite bound", self.metric));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!(
                    "threshold for '{}' has min {} greater than max {}",
                    self.metric, min, max
                ));
            }
        }
        if self.alert_type.is_empty() {
            return Err(format!("threshold for '{}' has an empty alert_type", self.metric));
        }
        Ok(())
    }
}

/// Rule table used when the configuration names none
pub fn default_thresholds() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::range(MetricType::Temperature, 15.0, 45.0),
        ThresholdRule::range(MetricType::Pressure, 1.0, 8.0),
        ThresholdRule::range(MetricType::Ph, 6.0, 8.0),
        ThresholdRule::range(MetricType::FlowRate, 0.5, 10.0),
        ThresholdRule::range(MetricType::LiquidLevel, 10.0, 95.0),
        ThresholdRule::below(MetricType::Level, 10.0)
            .with_severity(Severity::High)
            .with_alert_type("low_liquid_level"),
    ]
}
