//! Configuration Module
//!
//! Provides TOML-based configuration for the bridge with support for:
//! - Broker connection and reconnect policy
//! - WebSocket push channel settings
//! - Threshold rules and extra topic routes
//! - HTTP status server
//! - Environment variable overrides (REFLOW__* prefix)

use std::net::SocketAddr;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use broker::{BrokerConfig, DEFAULT_MQTT_PORT};
pub use thresholds::{default_thresholds, Severity, ThresholdRule};

use crate::router::{validate_topic_name, Category, TopicPattern};

mod broker;
mod thresholds;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Device broker connection
    pub broker: BrokerConfig,
    /// WebSocket push channel
    pub server: ServerConfig,
    /// Inbound processing
    pub pipeline: PipelineConfig,
    /// HTTP status server
    pub http: HttpConfig,
    /// Outbound command settings
    pub commands: CommandsConfig,
    /// Threshold rules; replaces the built-in table when present
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdRule>,
    /// Extra topic routes on top of the built-in table
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            broker: BrokerConfig::default(),
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            http: HttpConfig::default(),
            commands: CommandsConfig::default(),
            thresholds: default_thresholds(),
            routes: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// WebSocket push channel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket bind address
    pub ws_bind: SocketAddr,
    /// WebSocket request path
    pub ws_path: String,
    /// Per-client outbound frame queue
    pub client_buffer: usize,
    /// Deliver every event to every client in addition to room members
    pub broadcast: bool,
    /// Maximum concurrent clients (0 = unlimited)
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind: SocketAddr::from(([0, 0, 0, 0], 5001)),
            ws_path: "/ws".to_string(),
            client_buffer: 256,
            broadcast: true,
            max_clients: 0,
        }
    }
}

/// Inbound message processing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Messages buffered between the broker connection and the pipeline
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// HTTP status server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether the status server runs
    pub enabled: bool,
    /// Bind address for /health, /ready, /metrics and /api/commands
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

/// Outbound command configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Default `source` stamped on command envelopes
    pub source: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            source: "backend_api".to_string(),
        }
    }
}

/// Extra topic route
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Pattern relative to the topic root, `{id}` marks the entity level
    pub pattern: String,
    /// Category assigned to matching topics
    pub category: Category,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `REFLOW__` prefix with double underscores for nesting:
    ///    - `REFLOW__BROKER__ADDRESS=mqtt.plant:1883` overrides `broker.address`
    ///    - `REFLOW__SERVER__WS_BIND=0.0.0.0:8080` overrides `server.ws_bind`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.address", "localhost:1883")?
            .set_default("broker.topic_root", "reflow")?
            .set_default("broker.qos", 1)?
            .set_default("server.ws_path", "/ws")?
            .set_default("server.broadcast", true)?
            .set_default("http.enabled", true)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("REFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker.address cannot be empty".to_string(),
            ));
        }
        if broker.qos > 2 {
            return Err(ConfigError::Validation(
                "broker.qos must be 0, 1, or 2".to_string(),
            ));
        }
        validate_topic_name(&broker.topic_root)
            .map_err(|e| ConfigError::Validation(format!("broker.topic_root: {}", e)))?;
        if broker.topic_root.split('/').any(str::is_empty) {
            return Err(ConfigError::Validation(
                "broker.topic_root cannot contain empty levels".to_string(),
            ));
        }
        if broker.reconnect_interval.is_zero() {
            return Err(ConfigError::Validation(
                "broker.reconnect_interval must be greater than zero".to_string(),
            ));
        }
        if broker.max_reconnect_interval < broker.reconnect_interval {
            return Err(ConfigError::Validation(
                "broker.max_reconnect_interval must not be below broker.reconnect_interval"
                    .to_string(),
            ));
        }
        if broker.request_capacity == 0 {
            return Err(ConfigError::Validation(
                "broker.request_capacity must be greater than zero".to_string(),
            ));
        }

        if self.server.client_buffer == 0 {
            return Err(ConfigError::Validation(
                "server.client_buffer must be greater than zero".to_string(),
            ));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "server.ws_path must start with '/'".to_string(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "pipeline.queue_capacity must be greater than zero".to_string(),
            ));
        }

        for rule in &self.thresholds {
            rule.validate().map_err(ConfigError::Validation)?;
        }

        for route in &self.routes {
            TopicPattern::parse(&route.pattern, route.category)
                .map_err(|e| ConfigError::Validation(format!("route '{}': {}", route.pattern, e)))?;
        }

        Ok(())
    }
}
