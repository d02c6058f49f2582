//! Command Publisher
//!
//! Serializes outbound device commands and publishes them on the command
//! topic for their category. `send` never waits on the network: while the
//! broker is down it fails immediately with [`PublishError::NotConnected`]
//! and nothing is retried.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub use crate::link::PublishError;

use crate::connection::ConnectionHandle;
use crate::metrics::Metrics;


/// Kind of command; selects the topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    /// `<root>/system/<id>/commands`
    System,
    /// `<root>/pumps/<id>/control`
    Pump,
    /// `<root>/uv/camera/<id>/commands`
    Camera,
    /// `<root>/ai/commands`
    Ai,
    /// `<root>/ai/results`
    AiResults,
}

impl CommandCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCategory::System => "system",
            CommandCategory::Pump => "pump",
            CommandCategory::Camera => "camera",
            CommandCategory::Ai => "ai",
            CommandCategory::AiResults => "ai_results",
        }
    }

    /// Whether the topic carries the target id
    pub fn is_targeted(&self) -> bool {
        matches!(
            self,
            CommandCategory::System | CommandCategory::Pump | CommandCategory::Camera
        )
    }

    /// Command topic under `root`
    pub fn topic(&self, root: &str, target_id: &str) -> String {
        match self {
            CommandCategory::System => format!("{}/system/{}/commands", root, target_id),
            CommandCategory::Pump => format!("{}/pumps/{}/control", root, target_id),
            CommandCategory::Camera => format!("{}/uv/camera/{}/commands", root, target_id),
            CommandCategory::Ai => format!("{}/ai/commands", root),
            CommandCategory::AiResults => format!("{}/ai/results", root),
        }
    }
}

/// A command for a device or the analysis service
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub category: CommandCategory,
    pub target_id: String,
    pub command: String,
    pub parameters: Map<String, Value>,
    pub issued_at: DateTime<Utc>,
    /// Overrides the configured source when set
    pub source: Option<String>,
}

impl OutboundCommand {
    pub fn new(category: CommandCategory, target_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            category,
            target_id: target_id.into(),
            command: command.into(),
            parameters: Map::new(),
            issued_at: Utc::now(),
            source: None,
        }
    }

    /// Command for a treatment system (`start`, `stop`, `flush`, ...)
    pub fn system(system_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(CommandCategory::System, system_id, command)
    }

    /// Pump action (`start`, `stop`, `speed`, ...)
    pub fn pump(pump_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(CommandCategory::Pump, pump_id, action)
    }

    /// Start a UV inspection on a camera
    pub fn uv_inspection(camera_id: impl Into<String>) -> Self {
        Self::new(CommandCategory::Camera, camera_id, "start_inspection")
    }

    /// Analysis results for an earlier request
    pub fn ai_results(analysis_id: impl Into<String>, results: Value) -> Self {
        Self::new(CommandCategory::AiResults, analysis_id, "analysis_results")
            .with_parameter("results", results)
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    command: &'a str,
    target_id: &'a str,
    parameters: &'a Map<String, Value>,
    timestamp: String,
    source: &'a str,
}

/// Reject ids that cannot be a single topic level
fn validate_target(category: CommandCategory, target_id: &str) -> Result<(), PublishError> {
    let bad = target_id.contains(|c: char| matches!(c, '/' | '+' | '#' | '\0'));
    if bad || (category.is_targeted() && target_id.is_empty()) {
        return Err(PublishError::InvalidTarget(target_id.to_string()));
    }
    Ok(())
}

/// Publishes commands through the broker connection
#[derive(Clone)]
pub struct CommandPublisher {
    connection: ConnectionHandle,
    root: String,
    source: String,
    metrics: Arc<Metrics>,
}

impl CommandPublisher {
    pub fn new(
        connection: ConnectionHandle,
        root: impl Into<String>,
        source: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            connection,
            root: root.into(),
            source: source.into(),
            metrics,
        }
    }

    /// Topic and payload a command is published as
    pub fn encode(&self, cmd: &OutboundCommand) -> Result<(String, Bytes), PublishError> {
        validate_target(cmd.category, &cmd.target_id)?;

        let envelope = Envelope {
            command: &cmd.command,
            target_id: &cmd.target_id,
            parameters: &cmd.parameters,
            timestamp: cmd.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            source: cmd.source.as_deref().unwrap_or(&self.source),
        };
        let payload = serde_json::to_vec(&envelope).map_err(|e| PublishError::Encode(e.to_string()))?;

        Ok((cmd.category.topic(&self.root, &cmd.target_id), Bytes::from(payload)))
    }

    /// Publish a command. Returns once the request is queued for the broker.
    pub fn send(&self, cmd: &OutboundCommand) -> Result<(), PublishError> {
        let category = cmd.category.as_str();
        let result = self
            .encode(cmd)
            .and_then(|(topic, payload)| {
                self.connection.publish(&topic, payload)?;
                Ok(topic)
            });

        match result {
            Ok(topic) => {
                self.metrics.command_sent(category);
                debug!("Command '{}' published to {}", cmd.command, topic);
                Ok(())
            }
            Err(e) => {
                self.metrics.command_failed(category);
                warn!(
                    "Command '{}' for '{}' not published: {}",
                    cmd.command, cmd.target_id, e
                );
                Err(e)
            }
        }
    }
}
