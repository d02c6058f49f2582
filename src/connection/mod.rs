//! Connection Manager
//!
//! Owns the single link to the device broker. Connects, subscribes to the
//! fixed topic set and forwards inbound messages, in arrival order, to the
//! pipeline queue. On any transport failure it waits out the backoff delay
//! and reconnects; it never gives up on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::link::{BrokerLink, BrokerMessage, LinkEvent, LinkHandle, PublishError, QoS};
use crate::metrics::Metrics;
use crate::router::validate_topic_filter;


/// State of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Not started, or stopped
    Disconnected,
    /// First connect attempt in progress
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Connection lost, waiting out the backoff before retrying
    Reconnecting,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Connection transitions announced to watchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// (Re)connected; `subscribed` filters were requested
    Connected { subscribed: usize, session_present: bool },
    /// Connection lost, a reconnect will follow
    Disconnected { reason: String },
    /// Waiting `delay` before the next connect attempt
    Reconnecting { delay: Duration },
    /// The manager stopped
    Stopped,
}

/// Reconnect pacing and subscription settings
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub qos: QoS,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            qos: config.qos(),
            reconnect_interval: config.reconnect_interval,
            max_reconnect_interval: config.max_reconnect_interval,
        }
    }

    /// Delay to use after `current`, doubling up to the cap
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.max_reconnect_interval).max(self.reconnect_interval)
    }
}

struct Shared {
    status: RwLock<LinkStatus>,
    reconnects: AtomicU64,
    signals: broadcast::Sender<LinkSignal>,
}

/// Cloneable view of the connection for publishers and status readers
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    link: Arc<dyn LinkHandle>,
    qos: QoS,
}

impl ConnectionHandle {
    pub fn status(&self) -> LinkStatus {
        *self.shared.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    /// Reconnect attempts since start
    pub fn reconnects(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<LinkSignal> {
        self.shared.signals.subscribe()
    }

    /// Publish at the configured QoS.
    ///
    /// Fails immediately with [`PublishError::NotConnected`] while the broker
    /// is down; nothing is queued for later.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.link.publish(topic, payload, self.qos)
    }
}

/// Drives one [`BrokerLink`]
pub struct ConnectionManager {
    settings: ConnectionSettings,
    filters: Vec<String>,
    inbound: mpsc::Sender<BrokerMessage>,
    metrics: Arc<Metrics>,
    shared: Arc<Shared>,
    link: Box<dyn BrokerLink>,
}

impl ConnectionManager {
    /// `filters` is the fixed subscription set, requested after every connect.
    pub fn new(
        link: Box<dyn BrokerLink>,
        settings: ConnectionSettings,
        filters: Vec<String>,
        inbound: mpsc::Sender<BrokerMessage>,
        metrics: Arc<Metrics>,
    ) -> (Self, ConnectionHandle) {
        let (signals, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            status: RwLock::new(LinkStatus::Disconnected),
            reconnects: AtomicU64::new(0),
            signals,
        });

        let filters = filters
            .into_iter()
            .filter(|filter| match validate_topic_filter(filter) {
                Ok(()) => true,
                Err(e) => {
                    error!("Skipping invalid subscription filter '{}': {}", filter, e);
                    false
                }
            })
            .collect();

        let handle = ConnectionHandle {
            shared: shared.clone(),
            link: link.handle(),
            qos: settings.qos,
        };

        let manager = Self {
            settings,
            filters,
            inbound,
            metrics,
            shared,
            link,
        };
        (manager, handle)
    }

    fn set_status(&self, status: LinkStatus) {
        *self.shared.status.write() = status;
    }

    fn status(&self) -> LinkStatus {
        *self.shared.status.read()
    }

    fn signal(&self, signal: LinkSignal) {
        // No watchers is fine
        let _ = self.shared.signals.send(signal);
    }

    /// Request every filter once. Failures are logged and retried on the
    /// next connect.
    fn subscribe_all(&self, handle: &dyn LinkHandle) -> usize {
        let mut subscribed = 0;
        for filter in &self.filters {
            match handle.subscribe(filter, self.settings.qos) {
                Ok(()) => subscribed += 1,
                Err(e) => {
                    self.metrics.subscription_failures.inc();
                    error!("{}", e);
                }
            }
        }
        subscribed
    }

    /// Run until shutdown. Returns after the link has been told to disconnect.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let handle = self.link.handle();
        let mut delay = self.settings.reconnect_interval;

        self.set_status(LinkStatus::Connecting);
        info!("Connecting to device broker");

        loop {
            let polled = tokio::select! {
                _ = shutdown.recv() => break,
                polled = self.link.poll() => polled,
            };

            match polled {
                Ok(LinkEvent::Connected { session_present }) => {
                    delay = self.settings.reconnect_interval;
                    // Subscriptions go out before the next poll, so nothing
                    // is forwarded until the whole set was requested.
                    let subscribed = self.subscribe_all(handle.as_ref());
                    self.set_status(LinkStatus::Connected);
                    self.metrics.broker_up();
                    info!(
                        "Connected to device broker, subscribed to {}/{} topic filters",
                        subscribed,
                        self.filters.len()
                    );
                    self.signal(LinkSignal::Connected {
                        subscribed,
                        session_present,
                    });
                }
                Ok(LinkEvent::Message(message)) => {
                    if self.status() != LinkStatus::Connected {
                        debug!("Dropping message on '{}' received before connect", message.topic);
                        continue;
                    }
                    self.metrics.messages_received.inc();
                    let forwarded = tokio::select! {
                        _ = shutdown.recv() => break,
                        sent = self.inbound.send(message) => sent,
                    };
                    if forwarded.is_err() {
                        warn!("Pipeline queue closed, stopping connection manager");
                        break;
                    }
                }
                Ok(LinkEvent::Idle) => {}
                Err(e) => {
                    let was_connected = self.status() == LinkStatus::Connected;
                    self.set_status(LinkStatus::Reconnecting);
                    self.metrics.broker_down();
                    self.metrics.reconnect_attempts.inc();
                    self.shared.reconnects.fetch_add(1, Ordering::Relaxed);

                    if was_connected {
                        warn!("Device broker connection lost: {}", e);
                    } else {
                        warn!("Device broker connect failed: {}", e);
                    }
                    self.signal(LinkSignal::Disconnected {
                        reason: e.to_string(),
                    });

                    debug!("Reconnecting in {:?}", delay);
                    self.signal(LinkSignal::Reconnecting { delay });
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.settings.next_delay(delay);
                }
            }
        }

        handle.disconnect();
        self.set_status(LinkStatus::Disconnected);
        self.metrics.broker_down();
        self.signal(LinkSignal::Stopped);
        info!("Connection manager stopped");
    }
}
