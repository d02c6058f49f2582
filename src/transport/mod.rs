//! Push Channel Transport
//!
//! WebSocket server for dashboard clients. Each accepted socket becomes a
//! client of the fan-out registry for as long as it stays open.

mod message;
mod websocket;

pub use message::{valid_entity_id, ClientRequest};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::fanout::FanoutPublisher;
use crate::metrics::Metrics;

#[cfg(test)]
mod tests;

/// Configure an accepted TCP stream
fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

/// A client slot held from accept until the session ends
struct ClientSlot(Arc<AtomicUsize>);

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket push server
pub struct WsServer {
    config: ServerConfig,
    fanout: FanoutPublisher,
    metrics: Arc<Metrics>,
    /// Sockets in handshake or session
    slots: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

impl WsServer {
    pub fn new(config: ServerConfig, fanout: FanoutPublisher, metrics: Arc<Metrics>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            fanout,
            metrics,
            slots: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.ws_bind).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!("WebSocket push channel listening on {} (path: {})", local, self.config.ws_path);

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.recv() => match result {
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    _ => break,
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_connection(stream, addr),
                    Err(e) => error!("Failed to accept WebSocket connection: {}", e),
                },
            }
        }

        info!("WebSocket push channel stopped");
        Ok(())
    }

    /// Take a slot unless `max_clients` are already accepted; handshakes
    /// in flight count against the limit
    fn reserve_slot(&self) -> Option<ClientSlot> {
        let max = self.config.max_clients;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| ClientSlot(self.slots.clone()))
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = configure_stream(&stream) {
            debug!("Failed to configure stream from {}: {}", addr, e);
        }

        let slot = self.reserve_slot();
        let full = slot.is_none();
        if full {
            self.metrics.clients_rejected.inc();
            warn!("Rejecting client {}: limit of {} reached", addr, self.config.max_clients);
        }

        let path = self.config.ws_path.clone();
        let fanout = self.fanout.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            match websocket::accept(stream, &path, full).await {
                Ok(ws) => websocket::serve_client(ws, addr, fanout, shutdown_rx).await,
                Err(e) => debug!("WebSocket handshake failed for {}: {}", addr, e),
            }
        });
    }

    /// Stop accepting and close every client
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
