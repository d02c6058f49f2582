//! In-process link
//!
//! A [`BrokerLink`] driven by a [`MemoryController`] instead of a network
//! connection. Connects, drops and inbound messages happen when the
//! controller says so; every request made through the handle is journaled.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    BrokerLink, BrokerMessage, ConnectionError, LinkEvent, LinkHandle, PublishError, QoS,
    SubscriptionError,
};

/// Request recorded by the memory link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    Subscribe { filter: String, qos: QoS },
    Publish { topic: String, payload: Bytes, qos: QoS },
    Disconnect,
}

enum Step {
    Connect { session_present: bool },
    Message(BrokerMessage),
    Drop(String),
}

#[derive(Default)]
struct Journal {
    requests: Mutex<Vec<LinkRequest>>,
    reject_subscribe: Mutex<Option<String>>,
}

struct MemoryHandle {
    journal: Arc<Journal>,
}

impl LinkHandle for MemoryHandle {
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscriptionError> {
        if let Some(reason) = self.journal.reject_subscribe.lock().clone() {
            return Err(SubscriptionError {
                filter: filter.to_string(),
                reason,
            });
        }
        self.journal.requests.lock().push(LinkRequest::Subscribe {
            filter: filter.to_string(),
            qos,
        });
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), PublishError> {
        self.journal.requests.lock().push(LinkRequest::Publish {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    fn disconnect(&self) {
        self.journal.requests.lock().push(LinkRequest::Disconnect);
    }
}

/// Event side of the memory link
pub struct MemoryLink {
    steps: mpsc::UnboundedReceiver<Step>,
    handle: Arc<MemoryHandle>,
}

/// Script side of the memory link
#[derive(Clone)]
pub struct MemoryController {
    steps: mpsc::UnboundedSender<Step>,
    journal: Arc<Journal>,
}

impl MemoryLink {
    pub fn pair() -> (Self, MemoryController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let journal = Arc::new(Journal::default());
        let link = Self {
            steps: rx,
            handle: Arc::new(MemoryHandle {
                journal: journal.clone(),
            }),
        };
        (link, MemoryController { steps: tx, journal })
    }
}

#[async_trait]
impl BrokerLink for MemoryLink {
    async fn poll(&mut self) -> Result<LinkEvent, ConnectionError> {
        match self.steps.recv().await {
            Some(Step::Connect { session_present }) => Ok(LinkEvent::Connected { session_present }),
            Some(Step::Message(message)) => Ok(LinkEvent::Message(message)),
            Some(Step::Drop(reason)) => Err(ConnectionError::ConnectionLost(reason)),
            // Controller gone: the link stays silent until shut down
            None => std::future::pending().await,
        }
    }

    fn handle(&self) -> Arc<dyn LinkHandle> {
        self.handle.clone()
    }
}

impl MemoryController {
    /// Accept the next connect
    pub fn connect(&self) {
        let _ = self.steps.send(Step::Connect {
            session_present: false,
        });
    }

    /// Deliver a message on the link
    pub fn message(&self, topic: impl Into<String>, payload: impl Into<Bytes>) {
        let _ = self.steps.send(Step::Message(BrokerMessage::new(topic, payload)));
    }

    /// Fail the connection
    pub fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self.steps.send(Step::Drop(reason.into()));
    }

    /// Make subsequent subscribe requests fail (None restores them)
    pub fn reject_subscriptions(&self, reason: Option<&str>) {
        *self.journal.reject_subscribe.lock() = reason.map(str::to_string);
    }

    pub fn requests(&self) -> Vec<LinkRequest> {
        self.journal.requests.lock().clone()
    }

    /// Filters subscribed so far, in request order, with repeats
    pub fn subscriptions(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                LinkRequest::Subscribe { filter, .. } => Some(filter),
                _ => None,
            })
            .collect()
    }

    /// Published (topic, payload) pairs, in request order
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                LinkRequest::Publish { topic, payload, .. } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }
}
