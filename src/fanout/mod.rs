//! Fan-out Publisher
//!
//! Distributes decoded events and alerts to push-channel clients. Every
//! client has its own bounded queue drained by its connection task, so
//! publishing never waits on a slow client: a full queue drops the frame
//! for that client only.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use event::{encode_frame, PushEvent, PushEvents};
pub use registry::{ClientId, ClientRegistry, Delivery};

use crate::decode::DecodedEvent;
use crate::metrics::Metrics;
use crate::threshold::AlertEvent;

pub mod event;
mod registry;

#[cfg(test)]
mod tests;

/// Publishes events to the client registry
#[derive(Clone)]
pub struct FanoutPublisher {
    registry: Arc<ClientRegistry>,
    metrics: Arc<Metrics>,
    broadcast: bool,
}

impl FanoutPublisher {
    /// `broadcast` sends every event to all clients in addition to the
    /// entity's room members.
    pub fn new(registry: Arc<ClientRegistry>, metrics: Arc<Metrics>, broadcast: bool) -> Self {
        Self {
            registry,
            metrics,
            broadcast,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Register a client and queue its `connected` greeting
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let (id, rx) = self.registry.register();
        self.metrics.client_connected();
        self.reply(id, event::CONNECTED, json!({ "clientId": id }));
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        if self.registry.remove(id) {
            self.metrics.client_disconnected();
            self.sync_rooms();
        }
    }

    pub fn join(&self, id: ClientId, entity_id: &str) -> bool {
        let joined = self.registry.join(id, entity_id);
        self.sync_rooms();
        joined
    }

    pub fn leave(&self, id: ClientId, entity_id: &str) -> bool {
        let left = self.registry.leave(id, entity_id);
        self.sync_rooms();
        left
    }

    fn sync_rooms(&self) {
        self.metrics.rooms_current.set(self.registry.room_count() as i64);
    }

    /// Queue a frame for a single client
    pub fn reply(&self, id: ClientId, event: &str, data: serde_json::Value) -> Delivery {
        match encode_frame(event, None, &data) {
            Ok(frame) => self.record(self.registry.send_to(id, frame)),
            Err(e) => {
                warn!("Failed to encode '{}' reply: {}", event, e);
                Delivery::default()
            }
        }
    }

    /// Push a decoded device message
    pub fn publish_event(&self, event: &DecodedEvent) -> Delivery {
        match PushEvent::from_decoded(event) {
            Ok(events) => {
                let mut delivery = Delivery::default();
                for push in &events {
                    delivery += self.publish(push);
                }
                delivery
            }
            Err(e) => {
                warn!("Failed to encode event from '{}': {}", event.topic, e);
                Delivery::default()
            }
        }
    }

    /// Push a synthesized alert
    pub fn publish_alert(&self, alert: &AlertEvent) -> Delivery {
        match PushEvent::from_alert(alert) {
            Ok(push) => self.publish(&push),
            Err(e) => {
                warn!("Failed to encode alert for '{}': {}", alert.entity_id, e);
                Delivery::default()
            }
        }
    }

    /// Deliver one push event to every interested client
    pub fn publish(&self, push: &PushEvent) -> Delivery {
        let mut delivery = Delivery::default();

        if self.broadcast {
            match push.encode(None) {
                Ok(frame) => delivery += self.registry.broadcast(&frame),
                Err(e) => warn!("Failed to encode '{}' frame: {}", push.name, e),
            }
        }

        if self.registry.room_size(&push.entity_id) > 0 {
            match push.encode(Some(&push.entity_id)) {
                Ok(frame) => delivery += self.registry.send_room(&push.entity_id, &frame),
                Err(e) => warn!("Failed to encode '{}' room frame: {}", push.name, e),
            }
        }

        if delivery.dropped > 0 {
            debug!(
                "Dropped '{}' for {} slow client(s)",
                push.name, delivery.dropped
            );
        }
        self.record(delivery)
    }

    fn record(&self, delivery: Delivery) -> Delivery {
        self.metrics.frames_delivered(delivery.sent, delivery.dropped);
        delivery
    }
}
