//! Message Decoder
//!
//! Turns a routed broker message into a typed [`DecodedEvent`]. Decoding is
//! all-or-nothing: a payload missing a required field for its category
//! yields a [`DecodeError`], never a partially populated event.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub use metric::MetricType;

use crate::config::Severity;
use crate::link::BrokerMessage;
use crate::router::{Category, TopicDescriptor};

mod fields;
mod metric;

#[cfg(test)]
mod tests;

/// Category-specific content of a decoded message
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    SensorReading {
        metric: MetricType,
        value: f64,
        unit: String,
    },
    SystemStatus {
        status: String,
        details: Map<String, Value>,
    },
    LiquidLevel {
        level: f64,
    },
    Imaging {
        subtype: Option<String>,
        image_ref: Option<String>,
        image_data: Option<String>,
    },
    Alert {
        severity: Severity,
        message: String,
        details: Map<String, Value>,
    },
}

/// A validated device message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub entity_id: String,
    pub category: Category,
    /// First topic level after the root (`system`, `filtration`, `pumps`, ...)
    pub namespace: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub body: EventBody,
}

impl DecodedEvent {
    /// Numeric reading carried by the event, if any
    pub fn reading(&self) -> Option<(MetricType, f64)> {
        match &self.body {
            EventBody::SensorReading { metric, value, .. } => Some((*metric, *value)),
            EventBody::LiquidLevel { level } => Some((MetricType::Level, *level)),
            _ => None,
        }
    }

    /// Imaging events with an image attached trigger downstream analysis
    pub fn has_image(&self) -> bool {
        matches!(
            &self.body,
            EventBody::Imaging { image_ref, image_data, .. }
                if image_ref.is_some() || image_data.is_some()
        )
    }
}

/// Why a payload was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeReason {
    /// Topic routed to Unknown
    Unroutable,
    /// Payload is not UTF-8
    NotUtf8,
    /// Payload is not JSON
    NotJson(String),
    /// Payload is JSON but not an object
    NotObject,
    /// Required field absent or null
    MissingField(&'static str),
    /// Field present with the wrong shape
    InvalidField { field: &'static str, reason: String },
    /// Numeric field is NaN or infinite
    NonFinite(&'static str),
    /// Sensor `type` names no known metric
    UnknownMetric(String),
}

impl std::fmt::Display for DecodeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeReason::Unroutable => write!(f, "topic is not routable"),
            DecodeReason::NotUtf8 => write!(f, "payload is not valid UTF-8"),
            DecodeReason::NotJson(e) => write!(f, "payload is not valid JSON: {}", e),
            DecodeReason::NotObject => write!(f, "payload is not a JSON object"),
            DecodeReason::MissingField(field) => write!(f, "missing field '{}'", field),
            DecodeReason::InvalidField { field, reason } => {
                write!(f, "invalid field '{}': {}", field, reason)
            }
            DecodeReason::NonFinite(field) => write!(f, "field '{}' is not finite", field),
            DecodeReason::UnknownMetric(m) => write!(f, "unknown metric type '{}'", m),
        }
    }
}

/// Decode failure for one message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub topic: String,
    pub reason: DecodeReason,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to decode message on '{}': {}", self.topic, self.reason)
    }
}

impl std::error::Error for DecodeError {}

/// Payload keys the bridge owns in status events; left out of `details`
const STATUS_FIELDS: &[&str] = &["status", "timestamp", "systemId", "systemType"];
/// Same for device alerts
const ALERT_FIELDS: &[&str] = &["message", "severity", "timestamp", "alertType", "entityId"];

/// Decode a message routed to `descriptor`
pub fn decode(descriptor: &TopicDescriptor, message: &BrokerMessage) -> Result<DecodedEvent, DecodeError> {
    decode_inner(descriptor, message).map_err(|reason| DecodeError {
        topic: descriptor.topic.clone(),
        reason,
    })
}

fn decode_inner(descriptor: &TopicDescriptor, message: &BrokerMessage) -> Result<DecodedEvent, DecodeReason> {
    if descriptor.category == Category::Unknown {
        return Err(DecodeReason::Unroutable);
    }

    let text = std::str::from_utf8(&message.payload).map_err(|_| DecodeReason::NotUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeReason::NotJson(e.to_string()))?;
    let obj = match value {
        Value::Object(obj) => obj,
        _ => return Err(DecodeReason::NotObject),
    };

    let timestamp = fields::timestamp(&obj, message.received_at)?;

    let body = match descriptor.category {
        Category::SensorData => sensor_reading(&obj)?,
        Category::SystemStatus => EventBody::SystemStatus {
            status: fields::required_str(&obj, "status")?.to_string(),
            details: fields::remaining(&obj, STATUS_FIELDS),
        },
        Category::LiquidLevel => EventBody::LiquidLevel {
            level: fields::required_number(&obj, "level")?,
        },
        Category::ImagingPayload => EventBody::Imaging {
            subtype: descriptor.subpath.first().cloned(),
            image_ref: fields::optional_str(&obj, &["imageRef", "imagePath"])?.map(str::to_string),
            image_data: fields::optional_str(&obj, &["imageData"])?.map(str::to_string),
        },
        Category::Alert => alert(&obj)?,
        Category::Unknown => return Err(DecodeReason::Unroutable),
    };

    Ok(DecodedEvent {
        entity_id: descriptor.entity_id.clone(),
        category: descriptor.category,
        namespace: descriptor.namespace.clone(),
        topic: descriptor.topic.clone(),
        timestamp,
        body,
    })
}

fn sensor_reading(obj: &fields::Object) -> Result<EventBody, DecodeReason> {
    let kind = match fields::optional_str(obj, &["type", "metricType"])? {
        Some(kind) => kind,
        None => return Err(DecodeReason::MissingField("type")),
    };
    let metric = MetricType::parse(kind).ok_or_else(|| DecodeReason::UnknownMetric(kind.to_string()))?;
    let value = fields::required_number(obj, "value")?;
    let unit = fields::optional_str(obj, &["unit"])?
        .unwrap_or_else(|| metric.default_unit())
        .to_string();

    Ok(EventBody::SensorReading { metric, value, unit })
}

fn alert(obj: &fields::Object) -> Result<EventBody, DecodeReason> {
    let message = fields::required_str(obj, "message")?.to_string();
    let severity = match fields::optional_str(obj, &["severity"])? {
        Some(s) => Severity::parse(s).ok_or_else(|| DecodeReason::InvalidField {
            field: "severity",
            reason: format!("unknown severity '{}'", s),
        })?,
        None => Severity::default(),
    };

    Ok(EventBody::Alert {
        severity,
        message,
        details: fields::remaining(obj, ALERT_FIELDS),
    })
}
