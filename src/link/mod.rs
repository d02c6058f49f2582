//! Broker Link
//!
//! The transport seam between the bridge and the device message broker.
//! The connection manager owns exactly one [`BrokerLink`] and drives it;
//! everything else reaches the broker through the [`LinkHandle`] it hands out.
//!
//! [`mqtt::MqttLink`] is the production implementation. [`memory::MemoryLink`]
//! is scripted in-process and simulates connects, drops and inbound traffic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod mqtt;

pub use memory::{LinkRequest, MemoryController, MemoryLink};
pub use mqtt::MqttLink;

/// Delivery quality requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Convert a configured level (0, 1, 2) into a QoS
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// Raw unit received from the broker
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Something that happened on the link
#[derive(Debug)]
pub enum LinkEvent {
    /// The broker accepted a (re)connect
    Connected { session_present: bool },
    /// A message arrived on a subscribed topic
    Message(BrokerMessage),
    /// Protocol traffic the bridge does not care about (acks, pings)
    Idle,
}

/// Transport-level failure. Always recoverable by reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection dropped or could not be established
    ConnectionLost(String),
    /// The broker refused the connect
    Rejected(String),
    /// Connect attempt timed out
    Timeout,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            ConnectionError::Rejected(msg) => write!(f, "Rejected by broker: {}", msg),
            ConnectionError::Timeout => write!(f, "Connect timed out"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// A topic subscription could not be requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionError {
    pub filter: String,
    pub reason: String,
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscribe to '{}' failed: {}", self.filter, self.reason)
    }
}

impl std::error::Error for SubscriptionError {}

/// Outbound publish failure, reported synchronously to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker connection is down
    NotConnected,
    /// The outbound request queue is full
    QueueFull,
    /// The link has shut down
    Closed,
    /// The command target cannot be turned into a topic
    InvalidTarget(String),
    /// The envelope could not be serialized
    Encode(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::NotConnected => write!(f, "Broker not connected"),
            PublishError::QueueFull => write!(f, "Outbound queue full"),
            PublishError::Closed => write!(f, "Broker link closed"),
            PublishError::InvalidTarget(target) => write!(f, "Invalid command target: {}", target),
            PublishError::Encode(msg) => write!(f, "Encode error: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}

/// Non-blocking request side of a link.
///
/// Calls only enqueue work for the link; none of them wait on the network.
pub trait LinkHandle: Send + Sync {
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscriptionError>;

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), PublishError>;

    fn disconnect(&self);
}

/// Event side of a link, driven by a single owner.
///
/// `poll` connects lazily. After it returns an error the next call starts a
/// fresh connect attempt; pacing between attempts is the caller's job.
#[async_trait]
pub trait BrokerLink: Send + 'static {
    async fn poll(&mut self) -> Result<LinkEvent, ConnectionError>;

    fn handle(&self) -> Arc<dyn LinkHandle>;
}
