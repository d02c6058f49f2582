//! ReFlow Bridge - telemetry fan-out between an MQTT device bus and
//! WebSocket dashboard clients
//!
//! Device messages are routed by topic, decoded into typed events, checked
//! against threshold rules and pushed to connected clients. Commands flow
//! the other way, from the HTTP API to device command topics.

pub mod command;
pub mod config;
pub mod connection;
pub mod decode;
pub mod fanout;
pub mod http;
pub mod link;
pub mod metrics;
pub mod router;
pub mod supervisor;
pub mod threshold;
pub mod transport;

pub use command::{CommandCategory, CommandPublisher, OutboundCommand};
pub use config::Config;
pub use connection::{ConnectionHandle, ConnectionManager, LinkStatus};
pub use decode::{DecodedEvent, EventBody, MetricType};
pub use fanout::{ClientRegistry, FanoutPublisher};
pub use http::StatusServer;
pub use link::{BrokerLink, BrokerMessage, MemoryLink, MqttLink, PublishError, QoS};
pub use metrics::Metrics;
pub use router::{Category, TopicDescriptor, TopicRouter};
pub use supervisor::{BridgeHealth, BridgeState, BridgeSupervisor, SupervisorError};
pub use threshold::{AlertEvent, ThresholdEvaluator};
pub use transport::WsServer;
