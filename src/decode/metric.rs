use serde::{Deserialize, Serialize};

/// Measured quantity of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Temperature,
    Pressure,
    Ph,
    FlowRate,
    LiquidLevel,
    Turbidity,
    Conductivity,
    UvIntensity,
    /// Tank fill level from liquid level topics
    Level,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Temperature => "temperature",
            MetricType::Pressure => "pressure",
            MetricType::Ph => "ph",
            MetricType::FlowRate => "flow_rate",
            MetricType::LiquidLevel => "liquid_level",
            MetricType::Turbidity => "turbidity",
            MetricType::Conductivity => "conductivity",
            MetricType::UvIntensity => "uv_intensity",
            MetricType::Level => "level",
        }
    }

    /// Parse a sensor `type` field. Accepts snake_case and camelCase.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" => Some(MetricType::Temperature),
            "pressure" => Some(MetricType::Pressure),
            "ph" => Some(MetricType::Ph),
            "flow_rate" | "flowrate" => Some(MetricType::FlowRate),
            "liquid_level" | "liquidlevel" => Some(MetricType::LiquidLevel),
            "turbidity" => Some(MetricType::Turbidity),
            "conductivity" => Some(MetricType::Conductivity),
            "uv_intensity" | "uvintensity" => Some(MetricType::UvIntensity),
            "level" => Some(MetricType::Level),
            _ => None,
        }
    }

    /// Unit assumed when a reading carries none
    pub fn default_unit(&self) -> &'static str {
        match self {
            MetricType::Temperature => "°C",
            MetricType::Pressure => "bar",
            MetricType::Ph => "pH",
            MetricType::FlowRate => "L/min",
            MetricType::LiquidLevel | MetricType::Level => "%",
            MetricType::Turbidity => "NTU",
            MetricType::Conductivity => "µS/cm",
            MetricType::UvIntensity => "mW/cm²",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
