use super::*;
use crate::router::TopicRouter;
use chrono::TimeZone;
use pretty_assertions::assert_eq;
use test_case::test_case;

fn decode_on(topic: &str, payload: &str) -> Result<DecodedEvent, DecodeError> {
    let router = TopicRouter::new("reflow");
    let descriptor = router.route(topic);
    decode(&descriptor, &BrokerMessage::new(topic, payload.to_string()))
}

fn reason(topic: &str, payload: &str) -> DecodeReason {
    decode_on(topic, payload).unwrap_err().reason
}

#[test]
fn test_sensor_reading() {
    let event = decode_on(
        "reflow/sensors/PUMP_7/data",
        r#"{"type":"pressure","value":9.2,"unit":"bar"}"#,
    )
    .unwrap();

    assert_eq!(event.entity_id, "PUMP_7");
    assert_eq!(event.category, Category::SensorData);
    assert_eq!(
        event.body,
        EventBody::SensorReading {
            metric: MetricType::Pressure,
            value: 9.2,
            unit: "bar".to_string(),
        }
    );
    assert_eq!(event.reading(), Some((MetricType::Pressure, 9.2)));
}

#[test]
fn test_sensor_reading_defaults_unit_and_coerces_string() {
    let event = decode_on(
        "reflow/sensors/T1/data",
        r#"{"metricType":"temperature","value":" 21.5 "}"#,
    )
    .unwrap();

    assert_eq!(
        event.body,
        EventBody::SensorReading {
            metric: MetricType::Temperature,
            value: 21.5,
            unit: "°C".to_string(),
        }
    );
}

#[test_case(r#"{"value":1}"#, DecodeReason::MissingField("type") ; "missing type")]
#[test_case(r#"{"type":"pressure"}"#, DecodeReason::MissingField("value") ; "missing value")]
#[test_case(r#"{"type":"pressure","value":null}"#, DecodeReason::MissingField("value") ; "null value")]
#[test_case(r#"{"type":"pressure","value":"NaN"}"#, DecodeReason::NonFinite("value") ; "nan string")]
#[test_case(r#"{"type":"pressure","value":"inf"}"#, DecodeReason::NonFinite("value") ; "infinite string")]
#[test_case(r#"{"type":"humidity","value":1}"#, DecodeReason::UnknownMetric("humidity".to_string()) ; "unknown metric")]
#[test_case("[1,2]", DecodeReason::NotObject ; "array payload")]
#[test_case("42", DecodeReason::NotObject ; "scalar payload")]
fn test_sensor_reading_rejected(payload: &str, expected: DecodeReason) {
    assert_eq!(reason("reflow/sensors/S1/data", payload), expected);
}

#[test]
fn test_invalid_value_type() {
    assert!(matches!(
        reason("reflow/sensors/S1/data", r#"{"type":"ph","value":true}"#),
        DecodeReason::InvalidField { field: "value", .. }
    ));
    assert!(matches!(
        reason("reflow/sensors/S1/data", r#"{"type":"ph","value":"seven"}"#),
        DecodeReason::InvalidField { field: "value", .. }
    ));
}

#[test]
fn test_not_json() {
    assert!(matches!(
        reason("reflow/sensors/S1/data", "{not json"),
        DecodeReason::NotJson(_)
    ));
}

#[test]
fn test_not_utf8() {
    let router = TopicRouter::new("reflow");
    let topic = "reflow/sensors/S1/data";
    let message = BrokerMessage::new(topic, vec![0xff, 0xfe, 0x00]);
    let err = decode(&router.route(topic), &message).unwrap_err();
    assert_eq!(err.reason, DecodeReason::NotUtf8);
    assert_eq!(err.topic, topic);
}

#[test]
fn test_unknown_topic_is_unroutable() {
    assert_eq!(
        reason("reflow/unknown/X/data", r#"{"value":1}"#),
        DecodeReason::Unroutable
    );
}

#[test]
fn test_system_status_keeps_details() {
    let event = decode_on(
        "reflow/filtration/F2/status",
        r#"{"status":"running","flowRate":4.2,"mode":"auto"}"#,
    )
    .unwrap();

    assert_eq!(event.namespace, "filtration");
    match event.body {
        EventBody::SystemStatus { status, details } => {
            assert_eq!(status, "running");
            assert_eq!(details.len(), 2);
            assert_eq!(details["mode"], "auto");
        }
        other => panic!("unexpected body: {:?}", other),
    }
}

#[test]
fn test_system_status_requires_string_status() {
    assert_eq!(
        reason("reflow/system/S1/status", r#"{"state":"ok"}"#),
        DecodeReason::MissingField("status")
    );
    assert!(matches!(
        reason("reflow/system/S1/status", r#"{"status":1}"#),
        DecodeReason::InvalidField { field: "status", .. }
    ));
}

#[test]
fn test_liquid_level() {
    let event = decode_on("reflow/liquid/TANK_2/level", r#"{"level": 5}"#).unwrap();
    assert_eq!(event.body, EventBody::LiquidLevel { level: 5.0 });
    assert_eq!(event.reading(), Some((MetricType::Level, 5.0)));

    assert_eq!(
        reason("reflow/liquid/TANK_2/level", r#"{"volume": 5}"#),
        DecodeReason::MissingField("level")
    );
}

#[test]
fn test_imaging_payload() {
    let event = decode_on(
        "reflow/uv/camera/CAM_1/thermal",
        r#"{"imagePath":"/captures/1.png"}"#,
    )
    .unwrap();
    assert_eq!(
        event.body,
        EventBody::Imaging {
            subtype: Some("thermal".to_string()),
            image_ref: Some("/captures/1.png".to_string()),
            image_data: None,
        }
    );
    assert!(event.has_image());

    let event = decode_on("reflow/uv/camera/CAM_1", r#"{"lamp":"on"}"#).unwrap();
    assert!(!event.has_image());

    assert!(matches!(
        reason("reflow/uv/camera/CAM_1", r#"{"imageData":7}"#),
        DecodeReason::InvalidField { field: "imageData", .. }
    ));
}

#[test]
fn test_identity_keys_not_kept_as_details() {
    let event = decode_on(
        "reflow/system/SYS_1/status",
        r#"{"status":"ok","systemId":"SYS_9","systemType":"other","flow":3}"#,
    )
    .unwrap();
    assert_eq!(event.entity_id, "SYS_1");
    match event.body {
        EventBody::SystemStatus { details, .. } => {
            assert_eq!(details.len(), 1);
            assert_eq!(details["flow"], 3);
        }
        other => panic!("unexpected body: {:?}", other),
    }

    let event = decode_on(
        "reflow/alerts/overheat",
        r#"{"message":"hot","entityId":"X","alertType":"fake"}"#,
    )
    .unwrap();
    match event.body {
        EventBody::Alert { details, .. } => assert!(details.is_empty()),
        other => panic!("unexpected body: {:?}", other),
    }
}

#[test]
fn test_alert() {
    let event = decode_on(
        "reflow/alerts/leak",
        r#"{"message":"Leak near pump 3","severity":"critical","zone":"B"}"#,
    )
    .unwrap();
    assert_eq!(event.entity_id, "leak");
    match event.body {
        EventBody::Alert {
            severity,
            message,
            details,
        } => {
            assert_eq!(severity, Severity::Critical);
            assert_eq!(message, "Leak near pump 3");
            assert_eq!(details["zone"], "B");
            assert!(!details.contains_key("severity"));
        }
        other => panic!("unexpected body: {:?}", other),
    }

    let event = decode_on("reflow/alerts/leak", r#"{"message":"x"}"#).unwrap();
    assert!(matches!(
        event.body,
        EventBody::Alert {
            severity: Severity::Warning,
            ..
        }
    ));

    assert_eq!(
        reason("reflow/alerts/leak", r#"{"severity":"high"}"#),
        DecodeReason::MissingField("message")
    );
}

#[test]
fn test_timestamps() {
    let event = decode_on(
        "reflow/liquid/T1/level",
        r#"{"level":50,"timestamp":"2024-03-01T12:00:00Z"}"#,
    )
    .unwrap();
    assert_eq!(
        event.timestamp,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    );

    let event = decode_on(
        "reflow/liquid/T1/level",
        r#"{"level":50,"timestamp":1709294400000}"#,
    )
    .unwrap();
    assert_eq!(
        event.timestamp,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    );

    assert!(matches!(
        reason("reflow/liquid/T1/level", r#"{"level":50,"timestamp":"yesterday"}"#),
        DecodeReason::InvalidField { field: "timestamp", .. }
    ));
}

#[test]
fn test_missing_timestamp_uses_receive_time() {
    let router = TopicRouter::new("reflow");
    let topic = "reflow/liquid/T1/level";
    let message = BrokerMessage::new(topic, r#"{"level":50}"#);
    let event = decode(&router.route(topic), &message).unwrap();
    assert_eq!(event.timestamp, message.received_at);
}
