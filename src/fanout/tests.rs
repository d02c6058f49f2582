use super::*;
use crate::config::Severity;
use crate::decode::{EventBody, MetricType};
use crate::router::Category;
use crate::threshold::Violation;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn publisher(buffer: usize, broadcast: bool) -> FanoutPublisher {
    let metrics = Arc::new(Metrics::new().unwrap());
    FanoutPublisher::new(Arc::new(ClientRegistry::new(buffer)), metrics, broadcast)
}

fn frame(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
    let text = rx.try_recv().expect("frame queued");
    serde_json::from_str(&text).unwrap()
}

fn event(entity: &str, body: EventBody) -> DecodedEvent {
    DecodedEvent {
        entity_id: entity.to_string(),
        category: Category::SensorData,
        namespace: "sensors".to_string(),
        topic: format!("reflow/sensors/{}/data", entity),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        body,
    }
}

fn pressure(entity: &str, value: f64) -> DecodedEvent {
    event(
        entity,
        EventBody::SensorReading {
            metric: MetricType::Pressure,
            value,
            unit: "bar".to_string(),
        },
    )
}

#[test]
fn test_connect_sends_greeting() {
    let fanout = publisher(8, true);
    let (id, mut rx) = fanout.connect();
    let greeting = frame(&mut rx);
    assert_eq!(greeting["event"], "connected");
    assert_eq!(greeting["data"]["clientId"], id);
    assert_eq!(fanout.registry().client_count(), 1);
}

#[test]
fn test_registry_rooms() {
    let registry = ClientRegistry::new(4);
    let (a, _rx_a) = registry.register();
    let (b, _rx_b) = registry.register();

    assert!(registry.join(a, "PUMP_7"));
    assert!(registry.join(b, "PUMP_7"));
    assert!(registry.join(b, "TANK_2"));
    assert_eq!(registry.room_size("PUMP_7"), 2);
    assert_eq!(registry.room_count(), 2);
    assert!(registry.is_member(b, "TANK_2"));

    assert!(registry.leave(a, "PUMP_7"));
    assert!(!registry.leave(a, "PUMP_7"));
    assert_eq!(registry.room_size("PUMP_7"), 1);

    assert!(registry.remove(b));
    assert!(!registry.remove(b));
    assert_eq!(registry.room_count(), 0);
    assert!(!registry.join(b, "PUMP_7"));
}

#[test]
fn test_broadcast_reaches_every_client() {
    let fanout = publisher(8, true);
    let (_a, mut rx_a) = fanout.connect();
    let (_b, mut rx_b) = fanout.connect();
    frame(&mut rx_a);
    frame(&mut rx_b);

    let delivery = fanout.publish_event(&pressure("PUMP_7", 4.0));
    assert_eq!(delivery, Delivery { sent: 2, dropped: 0 });

    for rx in [&mut rx_a, &mut rx_b] {
        let f = frame(rx);
        assert_eq!(f["event"], "sensorData");
        assert!(f.get("room").is_none());
        assert_eq!(f["data"]["sensorId"], "PUMP_7");
        assert_eq!(f["data"]["metricType"], "pressure");
        assert_eq!(f["data"]["value"], 4.0);
        assert_eq!(f["data"]["unit"], "bar");
        assert_eq!(f["data"]["timestamp"], "2024-03-01T12:00:00.000Z");
    }
}

#[test]
fn test_room_scoped_delivery() {
    let fanout = publisher(8, false);
    let (member, mut rx_member) = fanout.connect();
    let (_other, mut rx_other) = fanout.connect();
    frame(&mut rx_member);
    frame(&mut rx_other);

    assert!(fanout.join(member, "PUMP_7"));
    fanout.publish_event(&pressure("PUMP_7", 4.0));
    fanout.publish_event(&pressure("PUMP_8", 4.0));

    let f = frame(&mut rx_member);
    assert_eq!(f["room"], "PUMP_7");
    assert!(rx_member.try_recv().is_err());
    assert!(rx_other.try_recv().is_err());
}

#[test]
fn test_broadcast_plus_room_frame() {
    let fanout = publisher(8, true);
    let (member, mut rx) = fanout.connect();
    frame(&mut rx);
    fanout.join(member, "TANK_2");

    fanout.publish_event(&event("TANK_2", EventBody::LiquidLevel { level: 5.0 }));
    let first = frame(&mut rx);
    let second = frame(&mut rx);
    assert!(first.get("room").is_none());
    assert_eq!(second["room"], "TANK_2");
    assert_eq!(second["event"], "liquidLevelUpdate");
    assert_eq!(second["data"]["liquidId"], "TANK_2");
}

#[test]
fn test_full_queue_drops_only_for_slow_client() {
    let fanout = publisher(2, true);
    let (_slow, mut rx_slow) = fanout.connect();
    let (_fast, mut rx_fast) = fanout.connect();
    frame(&mut rx_fast);

    // slow still holds its greeting, so one slot is left
    let first = fanout.publish_event(&pressure("S1", 1.0));
    assert_eq!(first, Delivery { sent: 2, dropped: 0 });
    frame(&mut rx_fast);

    let second = fanout.publish_event(&pressure("S1", 2.0));
    assert_eq!(second, Delivery { sent: 1, dropped: 1 });
    assert_eq!(frame(&mut rx_fast)["data"]["value"], 2.0);

    assert_eq!(frame(&mut rx_slow)["event"], "connected");
    assert_eq!(frame(&mut rx_slow)["data"]["value"], 1.0);
    assert!(rx_slow.try_recv().is_err());
}

#[test]
fn test_order_preserved_per_client() {
    let fanout = publisher(16, true);
    let (_id, mut rx) = fanout.connect();
    frame(&mut rx);

    for i in 0..5 {
        fanout.publish_event(&pressure("S1", i as f64));
    }
    let values: Vec<f64> = (0..5)
        .map(|_| frame(&mut rx)["data"]["value"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_imaging_triggers_analysis() {
    let fanout = publisher(8, true);
    let (_id, mut rx) = fanout.connect();
    frame(&mut rx);

    fanout.publish_event(&event(
        "CAM_1",
        EventBody::Imaging {
            subtype: Some("thermal".to_string()),
            image_ref: Some("/captures/1.png".to_string()),
            image_data: None,
        },
    ));

    let data = frame(&mut rx);
    assert_eq!(data["event"], "uvCameraData");
    assert_eq!(data["data"]["subtype"], "thermal");
    let trigger = frame(&mut rx);
    assert_eq!(trigger["event"], "aiAnalysisTrigger");
    assert_eq!(trigger["data"]["cameraId"], "CAM_1");
    assert_eq!(trigger["data"]["imageRef"], "/captures/1.png");

    fanout.publish_event(&event(
        "CAM_1",
        EventBody::Imaging {
            subtype: None,
            image_ref: None,
            image_data: None,
        },
    ));
    assert_eq!(frame(&mut rx)["event"], "uvCameraData");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_status_and_device_alert_frames() {
    let fanout = publisher(8, true);
    let (_id, mut rx) = fanout.connect();
    frame(&mut rx);

    let mut details = serde_json::Map::new();
    details.insert("mode".to_string(), Value::from("auto"));
    let mut status = event(
        "F2",
        EventBody::SystemStatus {
            status: "running".to_string(),
            details: details.clone(),
        },
    );
    status.namespace = "filtration".to_string();
    fanout.publish_event(&status);

    let f = frame(&mut rx);
    assert_eq!(f["event"], "systemStatusUpdate");
    assert_eq!(f["data"]["systemId"], "F2");
    assert_eq!(f["data"]["systemType"], "filtration");
    assert_eq!(f["data"]["status"], "running");
    assert_eq!(f["data"]["mode"], "auto");

    fanout.publish_event(&event(
        "leak",
        EventBody::Alert {
            severity: Severity::Critical,
            message: "Leak".to_string(),
            details,
        },
    ));
    let f = frame(&mut rx);
    assert_eq!(f["event"], "systemAlert");
    assert_eq!(f["data"]["alertType"], "leak");
    assert_eq!(f["data"]["severity"], "critical");
    assert_eq!(f["data"]["message"], "Leak");
}

#[test]
fn test_device_fields_never_replace_entity_identity() {
    let fanout = publisher(8, true);
    let (_id, mut rx) = fanout.connect();
    frame(&mut rx);

    let mut details = serde_json::Map::new();
    details.insert("systemId".to_string(), Value::from("SYS_9"));
    details.insert("status".to_string(), Value::from("spoofed"));
    details.insert("flow".to_string(), Value::from(12));
    let mut status = event(
        "SYS_1",
        EventBody::SystemStatus {
            status: "ok".to_string(),
            details,
        },
    );
    status.namespace = "system".to_string();
    fanout.publish_event(&status);

    let f = frame(&mut rx);
    assert_eq!(f["data"]["systemId"], "SYS_1");
    assert_eq!(f["data"]["systemType"], "system");
    assert_eq!(f["data"]["status"], "ok");
    assert_eq!(f["data"]["flow"], 12);

    let mut details = serde_json::Map::new();
    details.insert("entityId".to_string(), Value::from("X"));
    details.insert("alertType".to_string(), Value::from("fake"));
    fanout.publish_event(&event(
        "overheat",
        EventBody::Alert {
            severity: Severity::Warning,
            message: "hot".to_string(),
            details,
        },
    ));

    let f = frame(&mut rx);
    assert_eq!(f["event"], "systemAlert");
    assert_eq!(f["data"]["entityId"], "overheat");
    assert_eq!(f["data"]["alertType"], "overheat");
}

#[test]
fn test_threshold_alert_frame() {
    let fanout = publisher(8, true);
    let (_id, mut rx) = fanout.connect();
    frame(&mut rx);

    let alert = AlertEvent {
        entity_id: "PUMP_7".to_string(),
        metric: MetricType::Pressure,
        observed_value: 9.2,
        violation: Violation::Above(8.0),
        min: Some(1.0),
        max: Some(8.0),
        severity: Severity::Warning,
        alert_type: "threshold_violation".to_string(),
        message: "pressure 9.2 on PUMP_7 is above maximum 8".to_string(),
        created_at: Utc::now(),
    };
    fanout.publish_alert(&alert);

    let f = frame(&mut rx);
    assert_eq!(f["event"], "systemAlert");
    assert_eq!(f["data"]["entityId"], "PUMP_7");
    assert_eq!(f["data"]["metricType"], "pressure");
    assert_eq!(f["data"]["severity"], "warning");
    assert_eq!(f["data"]["max"], 8.0);
}

#[test]
fn test_disconnect_updates_counts() {
    let fanout = publisher(8, true);
    let (id, _rx) = fanout.connect();
    fanout.join(id, "S1");
    fanout.disconnect(id);
    assert_eq!(fanout.registry().client_count(), 0);
    assert_eq!(fanout.registry().room_count(), 0);
    assert_eq!(fanout.publish_event(&pressure("S1", 1.0)), Delivery::default());
}
