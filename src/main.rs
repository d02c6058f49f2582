//! ReFlow Bridge - MQTT to WebSocket telemetry bridge
//!
//! Usage:
//!   reflow-bridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   -b, --broker <ADDR>     Device broker address (host:port)
//!   -w, --ws-bind <ADDR>    WebSocket bind address (default: 0.0.0.0:5001)
//!   --http-bind <ADDR>      Status server bind address (default: 0.0.0.0:9090)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use reflow_bridge::config::Config;
use reflow_bridge::http::StatusServer;
use reflow_bridge::supervisor::BridgeSupervisor;
use reflow_bridge::transport::WsServer;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// ReFlow Bridge - MQTT to WebSocket telemetry bridge
#[derive(Parser, Debug)]
#[command(name = "reflow-bridge")]
#[command(author = "ReFlow Contributors")]
#[command(version)]
#[command(about = "Telemetry fan-out bridge between an MQTT device bus and WebSocket clients")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device broker address (host:port)
    #[arg(short, long)]
    broker: Option<String>,

    /// WebSocket bind address
    #[arg(short, long)]
    ws_bind: Option<SocketAddr>,

    /// Status server bind address
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // File config, then REFLOW__* environment overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, RUST_LOG overrides both
    let level = args
        .log_level
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| config.log.level.to_lowercase());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    if let Some(broker) = args.broker {
        config.broker.address = broker;
    }
    if let Some(ws_bind) = args.ws_bind {
        config.server.ws_bind = ws_bind;
    }
    if let Some(http_bind) = args.http_bind {
        config.http.bind = http_bind;
    }
    config.validate()?;

    info!("Starting ReFlow Bridge");
    info!("  Broker: {} (root '{}')", config.broker.address, config.broker.topic_root);
    info!("  WebSocket: {}{}", config.server.ws_bind, config.server.ws_path);
    info!("  Threshold rules: {}", config.thresholds.len());
    info!("  Extra routes: {}", config.routes.len());

    let supervisor = Arc::new(BridgeSupervisor::new(config.clone())?);
    supervisor.start_mqtt()?;

    let (shutdown, _) = broadcast::channel::<()>(1);

    let ws_server = Arc::new(WsServer::new(
        config.server.clone(),
        supervisor.fanout().clone(),
        supervisor.metrics().clone(),
    ));
    let ws_task = {
        let ws_server = ws_server.clone();
        tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                error!("WebSocket server error: {}", e);
            }
        })
    };

    if config.http.enabled {
        info!("  Status server: http://{}", config.http.bind);
        let status_server = StatusServer::new(supervisor.clone(), config.http.bind);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = status_server.run(shutdown_rx).await {
                error!("Status server error: {}", e);
            }
        });
    } else {
        info!("  Status server: disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    ws_server.shutdown();
    let _ = shutdown.send(());
    supervisor.shutdown().await;
    let _ = ws_task.await;

    Ok(())
}
