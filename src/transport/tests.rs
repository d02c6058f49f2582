use super::*;
use crate::fanout::{ClientRegistry, PushEvent};
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    server: Arc<WsServer>,
    fanout: FanoutPublisher,
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

async fn start(max_clients: usize) -> Harness {
    let metrics = Arc::new(Metrics::new().unwrap());
    let fanout = FanoutPublisher::new(Arc::new(ClientRegistry::new(16)), metrics.clone(), true);
    let config = ServerConfig {
        max_clients,
        ..ServerConfig::default()
    };
    let server = Arc::new(WsServer::new(config, fanout.clone(), metrics.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    Harness {
        server,
        fanout,
        metrics,
        addr,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn wait_clients(fanout: &FanoutPublisher, expected: usize) {
    timeout(WAIT, async {
        while fanout.registry().client_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client count in time");
}

#[tokio::test]
async fn test_greeting_and_room_subscription() {
    let h = start(0).await;
    let mut ws = connect(h.addr).await;

    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["event"], "connected");
    assert!(greeting["data"]["clientId"].is_u64());

    send(&mut ws, json!({"type": "subscribe", "entityId": "PUMP_7"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["event"], "subscribed");
    assert_eq!(reply["data"]["entityId"], "PUMP_7");

    h.fanout.publish(&PushEvent {
        name: "sensorData",
        entity_id: "PUMP_7".to_string(),
        data: json!({"sensorId": "PUMP_7", "value": 3.5}),
    });

    // Broadcast frame first, then the room-tagged copy
    let first = next_json(&mut ws).await;
    assert_eq!(first["event"], "sensorData");
    assert!(first.get("room").is_none());
    let second = next_json(&mut ws).await;
    assert_eq!(second["room"], "PUMP_7");
    assert_eq!(second["data"]["value"], 3.5);

    send(&mut ws, json!({"type": "unsubscribe", "entityId": "PUMP_7"})).await;
    assert_eq!(next_json(&mut ws).await["event"], "unsubscribed");
    assert_eq!(h.fanout.registry().room_count(), 0);
}

#[tokio::test]
async fn test_ping_and_bad_requests() {
    let h = start(0).await;
    let mut ws = connect(h.addr).await;
    next_json(&mut ws).await;

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut ws).await["event"], "pong");

    ws.send(Message::Text("hello".to_string())).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert!(error["data"]["message"].as_str().unwrap().starts_with("Invalid request"));

    send(&mut ws, json!({"type": "subscribe", "entityId": "a/#"})).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert_eq!(h.fanout.registry().room_count(), 0);
}

#[tokio::test]
async fn test_wrong_path_rejected() {
    let h = start(0).await;
    let result = connect_async(format!("ws://{}/mqtt", h.addr)).await;
    assert!(result.is_err());
    assert_eq!(h.fanout.registry().client_count(), 0);
}

#[tokio::test]
async fn test_client_limit() {
    let h = start(1).await;
    let mut first = connect(h.addr).await;
    next_json(&mut first).await;

    let second = connect_async(format!("ws://{}/ws", h.addr)).await;
    assert!(second.is_err());
    assert_eq!(h.metrics.clients_rejected.get(), 1);
    assert_eq!(h.fanout.registry().client_count(), 1);
}

#[tokio::test]
async fn test_concurrent_handshakes_respect_limit() {
    let h = start(2).await;
    let attempts = (0..5).map(|_| connect_async(format!("ws://{}/ws", h.addr)));
    let results = futures_util::future::join_all(attempts).await;

    let mut accepted: Vec<Client> = results
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|(ws, _)| ws)
        .collect();
    assert_eq!(accepted.len(), 2);
    for ws in &mut accepted {
        next_json(ws).await;
    }
    assert_eq!(h.fanout.registry().client_count(), 2);
    assert_eq!(h.metrics.clients_rejected.get(), 3);
}

#[tokio::test]
async fn test_slot_released_when_client_leaves() {
    let h = start(1).await;
    let mut first = connect(h.addr).await;
    next_json(&mut first).await;
    first.close(None).await.unwrap();
    wait_clients(&h.fanout, 0).await;

    // The slot is freed once the session task ends
    let mut second = None;
    for _ in 0..50 {
        if let Ok((ws, _)) = connect_async(format!("ws://{}/ws", h.addr)).await {
            second = Some(ws);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut second = second.expect("slot released");
    assert_eq!(next_json(&mut second).await["event"], "connected");
}

#[test]
fn test_reserve_slot_counts_pending_sockets() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let fanout = FanoutPublisher::new(Arc::new(ClientRegistry::new(4)), metrics.clone(), true);
    let config = ServerConfig {
        max_clients: 2,
        ..ServerConfig::default()
    };
    let server = WsServer::new(config, fanout, metrics);

    let a = server.reserve_slot().unwrap();
    let _b = server.reserve_slot().unwrap();
    assert!(server.reserve_slot().is_none());
    drop(a);
    assert!(server.reserve_slot().is_some());

    let unlimited = WsServer::new(
        ServerConfig::default(),
        FanoutPublisher::new(
            Arc::new(ClientRegistry::new(4)),
            Arc::new(Metrics::new().unwrap()),
            true,
        ),
        Arc::new(Metrics::new().unwrap()),
    );
    let held: Vec<_> = (0..10).filter_map(|_| unlimited.reserve_slot()).collect();
    assert_eq!(held.len(), 10);
}

#[tokio::test]
async fn test_disconnect_removes_client() {
    let h = start(0).await;
    let mut ws = connect(h.addr).await;
    next_json(&mut ws).await;
    send(&mut ws, json!({"type": "subscribe", "entityId": "TANK_2"})).await;
    next_json(&mut ws).await;
    assert_eq!(h.fanout.registry().client_count(), 1);

    ws.close(None).await.unwrap();
    wait_clients(&h.fanout, 0).await;
    assert_eq!(h.fanout.registry().room_count(), 0);
    assert_eq!(h.metrics.clients_current.get(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let h = start(0).await;
    let mut ws = connect(h.addr).await;
    next_json(&mut ws).await;

    h.server.shutdown();
    wait_clients(&h.fanout, 0).await;

    let closed = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
