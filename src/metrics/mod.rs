//! Prometheus metrics for the bridge
//!
//! Exposed at /metrics by the HTTP status server.

use prometheus::core::Collector;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// All bridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Inbound pipeline
    pub messages_received: IntCounter,
    pub messages_by_category: IntCounterVec,
    pub unknown_topics: IntCounter,
    pub decode_failures: IntCounter,
    pub alerts_total: IntCounterVec,
    pub processing_latency: Histogram,
    pub pipeline_restarts: IntCounter,

    // Push channel
    pub frames_sent: IntCounter,
    pub frames_dropped: IntCounter,
    pub clients_current: IntGauge,
    pub clients_rejected: IntCounter,
    pub rooms_current: IntGauge,

    // Broker connection
    pub broker_connected: IntGauge,
    pub reconnect_attempts: IntCounter,
    pub subscription_failures: IntCounter,

    // Outbound commands
    pub commands_sent: IntCounterVec,
    pub commands_failed: IntCounterVec,
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_received = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_messages_received_total",
                "Total messages received from the device broker",
            ))?,
        )?;

        let messages_by_category = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "reflow_bridge_messages_by_category_total",
                    "Decoded messages by topic category",
                ),
                &["category"],
            )?,
        )?;

        let unknown_topics = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_unknown_topics_total",
                "Messages on topics matching no route",
            ))?,
        )?;

        let decode_failures = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_decode_failures_total",
                "Messages dropped because the payload could not be decoded",
            ))?,
        )?;

        let alerts_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "reflow_bridge_alerts_total",
                    "Alerts pushed to clients by severity",
                ),
                &["severity"],
            )?,
        )?;

        let processing_latency = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "reflow_bridge_processing_latency_seconds",
                    "Time to route, decode, evaluate and fan out one message",
                )
                .buckets(vec![
                    0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1,
                ]),
            )?,
        )?;

        let pipeline_restarts = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_pipeline_restarts_total",
                "Times the message pipeline worker was restarted",
            ))?,
        )?;

        let frames_sent = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_push_frames_sent_total",
                "Frames queued to push channel clients",
            ))?,
        )?;

        let frames_dropped = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_push_frames_dropped_total",
                "Frames dropped because a client queue was full",
            ))?,
        )?;

        let clients_current = register(
            &registry,
            IntGauge::with_opts(Opts::new(
                "reflow_bridge_clients_current",
                "Currently connected push channel clients",
            ))?,
        )?;

        let clients_rejected = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_clients_rejected_total",
                "Push channel connections refused at the client limit",
            ))?,
        )?;

        let rooms_current = register(
            &registry,
            IntGauge::with_opts(Opts::new(
                "reflow_bridge_rooms_current",
                "Entity rooms with at least one member",
            ))?,
        )?;

        let broker_connected = register(
            &registry,
            IntGauge::with_opts(Opts::new(
                "reflow_bridge_broker_connected",
                "1 while the device broker connection is up",
            ))?,
        )?;

        let reconnect_attempts = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_reconnect_attempts_total",
                "Broker reconnect attempts",
            ))?,
        )?;

        let subscription_failures = register(
            &registry,
            IntCounter::with_opts(Opts::new(
                "reflow_bridge_subscription_failures_total",
                "Topic subscriptions that could not be requested",
            ))?,
        )?;

        let commands_sent = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "reflow_bridge_commands_sent_total",
                    "Outbound device commands handed to the broker",
                ),
                &["category"],
            )?,
        )?;

        let commands_failed = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "reflow_bridge_commands_failed_total",
                    "Outbound device commands that failed to publish",
                ),
                &["category"],
            )?,
        )?;

        Ok(Metrics {
            registry,
            messages_received,
            messages_by_category,
            unknown_topics,
            decode_failures,
            alerts_total,
            processing_latency,
            pipeline_restarts,
            frames_sent,
            frames_dropped,
            clients_current,
            clients_rejected,
            rooms_current,
            broker_connected,
            reconnect_attempts,
            subscription_failures,
            commands_sent,
            commands_failed,
        })
    }

    pub fn message_decoded(&self, category: &str) {
        self.messages_by_category
            .with_label_values(&[category])
            .inc();
    }

    pub fn alert_raised(&self, severity: &str) {
        self.alerts_total.with_label_values(&[severity]).inc();
    }

    pub fn client_connected(&self) {
        self.clients_current.inc();
    }

    pub fn client_disconnected(&self) {
        self.clients_current.dec();
    }

    pub fn frames_delivered(&self, sent: usize, dropped: usize) {
        self.frames_sent.inc_by(sent as u64);
        self.frames_dropped.inc_by(dropped as u64);
    }

    pub fn broker_up(&self) {
        self.broker_connected.set(1);
    }

    pub fn broker_down(&self) {
        self.broker_connected.set(0);
    }

    pub fn command_sent(&self, category: &str) {
        self.commands_sent.with_label_values(&[category]).inc();
    }

    pub fn command_failed(&self, category: &str) {
        self.commands_failed.with_label_values(&[category]).inc();
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
