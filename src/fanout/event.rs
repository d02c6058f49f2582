//! Push-channel wire model
//!
//! Every frame sent to a client is a JSON text message
//! `{"event": <name>, "room": <entityId>?, "data": {...}}`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use smallvec::{smallvec, SmallVec};

use crate::decode::{DecodedEvent, EventBody, MetricType};
use crate::config::Severity;
use crate::threshold::AlertEvent;

pub const SENSOR_DATA: &str = "sensorData";
pub const SYSTEM_STATUS_UPDATE: &str = "systemStatusUpdate";
pub const LIQUID_LEVEL_UPDATE: &str = "liquidLevelUpdate";
pub const UV_CAMERA_DATA: &str = "uvCameraData";
pub const AI_ANALYSIS_TRIGGER: &str = "aiAnalysisTrigger";
pub const SYSTEM_ALERT: &str = "systemAlert";
pub const CONNECTED: &str = "connected";

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorData<'a> {
    sensor_id: &'a str,
    timestamp: String,
    metric_type: MetricType,
    value: f64,
    unit: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemStatusUpdate<'a> {
    system_id: &'a str,
    system_type: &'a str,
    timestamp: String,
    status: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LiquidLevelUpdate<'a> {
    liquid_id: &'a str,
    timestamp: String,
    level: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CameraData<'a> {
    camera_id: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtype: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAlert<'a> {
    alert_type: &'a str,
    entity_id: &'a str,
    severity: Severity,
    message: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdAlert<'a> {
    alert_type: &'a str,
    metric_type: MetricType,
    entity_id: &'a str,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    severity: Severity,
    message: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct Frame<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
    data: &'a Value,
}

/// One named event for clients, scoped to an entity room
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub name: &'static str,
    pub entity_id: String,
    pub data: Value,
}

/// Events produced by one decoded message; imaging with an image yields two
pub type PushEvents = SmallVec<[PushEvent; 2]>;

impl PushEvent {
    /// Client events for a decoded device message
    pub fn from_decoded(event: &DecodedEvent) -> Result<PushEvents, serde_json::Error> {
        let id = event.entity_id.as_str();
        let timestamp = rfc3339(&event.timestamp);

        let events = match &event.body {
            EventBody::SensorReading {
                metric,
                value,
                unit,
            } => smallvec![Self::build(
                SENSOR_DATA,
                id,
                &SensorData {
                    sensor_id: id,
                    timestamp,
                    metric_type: *metric,
                    value: *value,
                    unit,
                },
            )?],
            EventBody::SystemStatus { status, details } => smallvec![Self::build_with_details(
                SYSTEM_STATUS_UPDATE,
                id,
                &SystemStatusUpdate {
                    system_id: id,
                    system_type: &event.namespace,
                    timestamp,
                    status,
                },
                details,
            )?],
            EventBody::LiquidLevel { level } => smallvec![Self::build(
                LIQUID_LEVEL_UPDATE,
                id,
                &LiquidLevelUpdate {
                    liquid_id: id,
                    timestamp,
                    level: *level,
                },
            )?],
            EventBody::Imaging {
                subtype,
                image_ref,
                image_data,
            } => {
                let data = CameraData {
                    camera_id: id,
                    timestamp,
                    subtype: subtype.as_deref(),
                    image_ref: image_ref.as_deref(),
                    image_data: image_data.as_deref(),
                };
                let mut events: PushEvents = smallvec![Self::build(UV_CAMERA_DATA, id, &data)?];
                if event.has_image() {
                    let trigger = CameraData { subtype: None, ..data };
                    events.push(Self::build(AI_ANALYSIS_TRIGGER, id, &trigger)?);
                }
                events
            }
            EventBody::Alert {
                severity,
                message,
                details,
            } => smallvec![Self::build_with_details(
                SYSTEM_ALERT,
                id,
                &DeviceAlert {
                    alert_type: id,
                    entity_id: id,
                    severity: *severity,
                    message,
                    timestamp,
                },
                details,
            )?],
        };

        Ok(events)
    }

    /// Client event for a synthesized threshold alert
    pub fn from_alert(alert: &AlertEvent) -> Result<Self, serde_json::Error> {
        Self::build(
            SYSTEM_ALERT,
            &alert.entity_id,
            &ThresholdAlert {
                alert_type: &alert.alert_type,
                metric_type: alert.metric,
                entity_id: &alert.entity_id,
                value: alert.observed_value,
                min: alert.min,
                max: alert.max,
                severity: alert.severity,
                message: &alert.message,
                timestamp: rfc3339(&alert.created_at),
            },
        )
    }

    fn build<T: Serialize>(name: &'static str, entity_id: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name,
            entity_id: entity_id.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Like `build`, with extra device fields that never replace the
    /// event's own fields
    fn build_with_details<T: Serialize>(
        name: &'static str,
        entity_id: &str,
        data: &T,
        details: &Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        let mut event = Self::build(name, entity_id, data)?;
        if let Value::Object(fields) = &mut event.data {
            for (key, value) in details {
                fields.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(event)
    }

    /// Encode as a frame, tagged with the room when delivered through one
    pub fn encode(&self, room: Option<&str>) -> Result<Arc<str>, serde_json::Error> {
        encode_frame(self.name, room, &self.data)
    }
}

/// Encode an arbitrary frame
pub fn encode_frame(event: &str, room: Option<&str>, data: &Value) -> Result<Arc<str>, serde_json::Error> {
    let text = serde_json::to_string(&Frame { event, room, data })?;
    Ok(Arc::from(text))
}
