//! Message pipeline
//!
//! The single consumer of the inbound queue. Each message is routed,
//! decoded, pushed to clients and checked against the threshold rules
//! before the next one is taken, which keeps per-connection order. Every
//! failure stays inside the message that caused it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::decode::{decode, DecodeError, EventBody};
use crate::fanout::FanoutPublisher;
use crate::link::BrokerMessage;
use crate::metrics::Metrics;
use crate::router::{Category, TopicRouter};
use crate::threshold::ThresholdEvaluator;

/// Shared end of the inbound queue; survives pipeline restarts
pub type InboundQueue = Arc<Mutex<mpsc::Receiver<BrokerMessage>>>;

/// What happened to one message
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Topic matched no route
    Unroutable,
    /// Payload rejected
    Rejected(DecodeError),
    /// Event pushed, with the number of alerts raised
    Delivered { category: Category, alerts: usize },
}

pub struct Pipeline {
    router: TopicRouter,
    evaluator: ThresholdEvaluator,
    fanout: FanoutPublisher,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        router: TopicRouter,
        evaluator: ThresholdEvaluator,
        fanout: FanoutPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            router,
            evaluator,
            fanout,
            metrics,
        }
    }

    /// Process one message to completion
    pub fn process(&self, message: &BrokerMessage) -> Outcome {
        let started = Instant::now();

        let descriptor = self.router.route(&message.topic);
        if descriptor.is_unknown() {
            self.metrics.unknown_topics.inc();
            debug!("No route for topic '{}', dropping", message.topic);
            return Outcome::Unroutable;
        }

        let event = match decode(&descriptor, message) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.decode_failures.inc();
                warn!("{}", e);
                return Outcome::Rejected(e);
            }
        };
        self.metrics.message_decoded(event.category.as_str());

        self.fanout.publish_event(&event);
        if let EventBody::Alert { severity, .. } = &event.body {
            self.metrics.alert_raised(severity.as_str());
        }

        let alerts = self.evaluator.evaluate(&event);
        for alert in &alerts {
            warn!(
                "Threshold violation on {}: {} (severity={})",
                alert.entity_id, alert.message, alert.severity
            );
            self.metrics.alert_raised(alert.severity.as_str());
            self.fanout.publish_alert(alert);
        }

        self.metrics
            .processing_latency
            .observe(started.elapsed().as_secs_f64());

        Outcome::Delivered {
            category: event.category,
            alerts: alerts.len(),
        }
    }

    /// Consume the queue until it closes
    pub async fn run(self: Arc<Self>, queue: InboundQueue) {
        loop {
            let message = {
                let mut rx = queue.lock().await;
                rx.recv().await
            };
            match message {
                Some(message) => {
                    self.process(&message);
                }
                None => {
                    debug!("Inbound queue closed, pipeline exiting");
                    return;
                }
            }
        }
    }
}
