//! Bridge Supervisor
//!
//! Wires the bridge together and owns its lifecycle: the connection
//! manager, the single pipeline worker and the task translating connection
//! signals into the bridge state. A panicking pipeline worker is replaced
//! without touching the connection or the queue.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus::IntCounter;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use pipeline::{InboundQueue, Outcome, Pipeline};

use crate::command::CommandPublisher;
use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionManager, ConnectionSettings, LinkSignal, LinkStatus};
use crate::fanout::{ClientRegistry, FanoutPublisher};
use crate::link::{BrokerLink, MqttLink};
use crate::metrics::Metrics;
use crate::router::TopicRouter;
use crate::threshold::ThresholdEvaluator;

mod pipeline;


/// How long `shutdown` waits for each task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Stopped,
    /// Started, broker not connected yet
    Starting,
    /// Broker connected, events flowing
    Running,
    /// Broker connection lost, reconnecting
    Degraded,
}

/// Snapshot for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BridgeHealth {
    pub state: BridgeState,
    pub broker: LinkStatus,
    pub clients: usize,
    pub rooms: usize,
    pub uptime_secs: u64,
    pub reconnects: u64,
}

/// Supervisor errors
#[derive(Debug)]
pub enum SupervisorError {
    /// `start` called while running
    AlreadyStarted,
    /// Operation needs a started bridge
    NotStarted,
    /// Metrics registry setup failed
    Metrics(prometheus::Error),
    /// A configured route is invalid
    Routes(String),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::AlreadyStarted => write!(f, "Bridge already started"),
            SupervisorError::NotStarted => write!(f, "Bridge not started"),
            SupervisorError::Metrics(e) => write!(f, "Metrics error: {}", e),
            SupervisorError::Routes(msg) => write!(f, "Route error: {}", msg),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<prometheus::Error> for SupervisorError {
    fn from(e: prometheus::Error) -> Self {
        SupervisorError::Metrics(e)
    }
}

/// Components that exist only while started
struct Active {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    connection: ConnectionHandle,
    commands: CommandPublisher,
    started: Instant,
}

/// Owns every bridge component
pub struct BridgeSupervisor {
    config: Config,
    metrics: Arc<Metrics>,
    fanout: FanoutPublisher,
    router: TopicRouter,
    evaluator: ThresholdEvaluator,
    state: Arc<watch::Sender<BridgeState>>,
    active: Mutex<Option<Active>>,
}

impl BridgeSupervisor {
    pub fn new(config: Config) -> Result<Self, SupervisorError> {
        let metrics = Arc::new(Metrics::new()?);
        let registry = Arc::new(ClientRegistry::new(config.server.client_buffer));
        let fanout = FanoutPublisher::new(registry, metrics.clone(), config.server.broadcast);
        let router = TopicRouter::with_routes(config.broker.topic_root.clone(), &config.routes)
            .map_err(SupervisorError::Routes)?;
        let evaluator = ThresholdEvaluator::new(config.thresholds.iter().cloned());
        let (state, _) = watch::channel(BridgeState::Stopped);

        Ok(Self {
            config,
            metrics,
            fanout,
            router,
            evaluator,
            state: Arc::new(state),
            active: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn fanout(&self) -> &FanoutPublisher {
        &self.fanout
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Start against the configured MQTT broker
    pub fn start_mqtt(&self) -> Result<(), SupervisorError> {
        self.start(MqttLink::new(&self.config.broker))
    }

    /// Start the bridge on `link`. Must be called inside a Tokio runtime.
    pub fn start<L: BrokerLink>(&self, link: L) -> Result<(), SupervisorError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        self.state.send_replace(BridgeState::Starting);
        info!(
            "Starting bridge (broker {}, topic root '{}')",
            self.config.broker.address, self.config.broker.topic_root
        );

        let (shutdown, _) = broadcast::channel(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.pipeline.queue_capacity);

        let (manager, connection) = ConnectionManager::new(
            Box::new(link),
            ConnectionSettings::from_config(&self.config.broker),
            self.router.subscription_filters(),
            inbound_tx,
            self.metrics.clone(),
        );
        let signals = connection.subscribe_signals();

        let pipeline = Arc::new(Pipeline::new(
            self.router.clone(),
            self.evaluator.clone(),
            self.fanout.clone(),
            self.metrics.clone(),
        ));
        let queue: InboundQueue = Arc::new(tokio::sync::Mutex::new(inbound_rx));

        let tasks = vec![
            tokio::spawn(manager.run(shutdown.subscribe())),
            tokio::spawn(supervise(
                "pipeline",
                move || pipeline.clone().run(queue.clone()),
                shutdown.subscribe(),
                self.metrics.pipeline_restarts.clone(),
            )),
            tokio::spawn(watch_signals(
                signals,
                self.state.clone(),
                shutdown.subscribe(),
            )),
        ];

        let commands = CommandPublisher::new(
            connection.clone(),
            self.config.broker.topic_root.clone(),
            self.config.commands.source.clone(),
            self.metrics.clone(),
        );

        *active = Some(Active {
            shutdown,
            tasks,
            connection,
            commands,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Command publisher bound to the running connection
    pub fn commands(&self) -> Result<CommandPublisher, SupervisorError> {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.commands.clone())
            .ok_or(SupervisorError::NotStarted)
    }

    pub fn health(&self) -> BridgeHealth {
        let registry = self.fanout.registry();
        let active = self.active.lock();
        let (broker, uptime_secs, reconnects) = match active.as_ref() {
            Some(a) => (
                a.connection.status(),
                a.started.elapsed().as_secs(),
                a.connection.reconnects(),
            ),
            None => (LinkStatus::Disconnected, 0, 0),
        };

        BridgeHealth {
            state: self.state(),
            broker,
            clients: registry.client_count(),
            rooms: registry.room_count(),
            uptime_secs,
            reconnects,
        }
    }

    /// Stop every task and disconnect from the broker
    pub async fn shutdown(&self) {
        let active = match self.active.lock().take() {
            Some(active) => active,
            None => return,
        };

        info!("Stopping bridge");
        let _ = active.shutdown.send(());
        for task in active.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.state.send_replace(BridgeState::Stopped);
        info!("Bridge stopped");
    }
}

/// Keep a worker running, replacing it after a panic
pub(crate) async fn supervise<F, Fut>(
    name: &'static str,
    mut spawn: F,
    mut shutdown: broadcast::Receiver<()>,
    restarts: IntCounter,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let mut worker = tokio::spawn(spawn());
        tokio::select! {
            _ = shutdown.recv() => {
                worker.abort();
                debug!("Worker '{}' stopped", name);
                return;
            }
            result = &mut worker => match result {
                Ok(()) => {
                    debug!("Worker '{}' finished", name);
                    return;
                }
                Err(e) if e.is_panic() => {
                    restarts.inc();
                    error!("Worker '{}' panicked, restarting", name);
                }
                Err(_) => return,
            }
        }
    }
}

/// Mirror connection signals into the bridge state
async fn watch_signals(
    mut signals: broadcast::Receiver<LinkSignal>,
    state: Arc<watch::Sender<BridgeState>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.recv() => return,
            signal = signals.recv() => signal,
        };

        match signal {
            Ok(LinkSignal::Connected { .. }) => {
                state.send_replace(BridgeState::Running);
            }
            // Degraded only once the bridge has been up; a failing first
            // connect keeps it in Starting
            Ok(LinkSignal::Disconnected { .. }) => {
                state.send_if_modified(|s| {
                    if *s == BridgeState::Running {
                        *s = BridgeState::Degraded;
                        true
                    } else {
                        false
                    }
                });
            }
            Ok(LinkSignal::Reconnecting { .. }) => {}
            Ok(LinkSignal::Stopped) | Err(broadcast::error::RecvError::Closed) => return,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Missed {} connection signals", n);
            }
        }
    }
}
