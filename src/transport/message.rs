//! Client request messages

use serde::Deserialize;

/// Reply event names
pub const SUBSCRIBED: &str = "subscribed";
pub const UNSUBSCRIBED: &str = "unsubscribed";
pub const PONG: &str = "pong";
pub const ERROR: &str = "error";

/// Text frame sent by a dashboard client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Join the room of one entity
    Subscribe {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
    /// Leave the room of one entity
    Unsubscribe {
        #[serde(rename = "entityId")]
        entity_id: String,
    },
    Ping,
}

impl ClientRequest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Entity ids are single topic levels
pub fn valid_entity_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(|c: char| matches!(c, '/' | '+' | '#' | '\0'))
}
