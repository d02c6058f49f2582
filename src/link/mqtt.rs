//! MQTT Link
//!
//! [`BrokerLink`] over an MQTT 3.1.1 connection using `rumqttc`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet,
    SubscribeReasonCode,
};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{
    BrokerLink, BrokerMessage, ConnectionError, LinkEvent, LinkHandle, PublishError, QoS,
    SubscriptionError,
};
use crate::config::BrokerConfig;

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Request side of the MQTT link
struct MqttHandle {
    client: AsyncClient,
}

impl LinkHandle for MqttHandle {
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SubscriptionError> {
        self.client
            .try_subscribe(filter, qos.into())
            .map_err(|e| SubscriptionError {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, qos.into(), false, payload.to_vec())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => PublishError::QueueFull,
                _ => PublishError::Closed,
            })
    }

    fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not queued: {}", e);
        }
    }
}

/// MQTT connection to the device broker
pub struct MqttLink {
    eventloop: EventLoop,
    handle: Arc<MqttHandle>,
    connect_timeout: Duration,
    connected: bool,
}

impl MqttLink {
    /// Build a link from configuration. No I/O happens until the first poll.
    pub fn new(config: &BrokerConfig) -> Self {
        let (host, port) = config.parse_address();

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(config.keepalive.max(1) as u64));
        options.set_clean_session(config.clean_session);
        if let Some(ref username) = config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);

        Self {
            eventloop,
            handle: Arc::new(MqttHandle { client }),
            connect_timeout: config.connect_timeout,
            connected: false,
        }
    }

    fn translate(&mut self, event: Event) -> Result<LinkEvent, ConnectionError> {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                if connack.code != ConnectReturnCode::Success {
                    return Err(ConnectionError::Rejected(format!("{:?}", connack.code)));
                }
                self.connected = true;
                Ok(LinkEvent::Connected {
                    session_present: connack.session_present,
                })
            }
            Event::Incoming(Packet::Publish(publish)) => Ok(LinkEvent::Message(BrokerMessage {
                topic: publish.topic,
                payload: publish.payload,
                received_at: Utc::now(),
            })),
            Event::Incoming(Packet::SubAck(suback)) => {
                let rejected = suback
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count();
                if rejected > 0 {
                    warn!(
                        "MQTT: broker rejected {} subscription(s) (pkid={})",
                        rejected, suback.pkid
                    );
                }
                Ok(LinkEvent::Idle)
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected = false;
                Err(ConnectionError::ConnectionLost(
                    "Broker sent DISCONNECT".to_string(),
                ))
            }
            _ => Ok(LinkEvent::Idle),
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn poll(&mut self) -> Result<LinkEvent, ConnectionError> {
        let polled = if self.connected {
            self.eventloop.poll().await
        } else {
            timeout(self.connect_timeout, self.eventloop.poll())
                .await
                .map_err(|_| ConnectionError::Timeout)?
        };

        match polled {
            Ok(event) => self.translate(event),
            Err(e) => {
                self.connected = false;
                Err(ConnectionError::ConnectionLost(e.to_string()))
            }
        }
    }

    fn handle(&self) -> Arc<dyn LinkHandle> {
        self.handle.clone()
    }
}
