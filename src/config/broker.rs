//! Broker Connection Configuration
//!
//! Settings for the single outbound connection to the device broker.

use std::time::Duration;

use serde::Deserialize;

use crate::link::QoS;

/// Default MQTT port when the address has none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Configuration for the device broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address (host:port or just host)
    pub address: String,

    /// Client ID to use when connecting
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Start without a stored session
    pub clean_session: bool,

    /// Connect timeout (e.g., "30s")
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Delay before the first reconnect attempt (e.g., "5s")
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Upper bound for the reconnect delay. Equal to `reconnect_interval`
    /// means a fixed delay; larger values enable doubling up to this cap.
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// First topic level of every device topic
    pub topic_root: String,

    /// QoS used for subscriptions and outbound commands (0, 1, 2)
    pub qos: u8,

    /// Capacity of the client request queue
    pub request_capacity: usize,
}

fn default_client_id() -> String {
    format!("reflow-bridge-{}", std::process::id())
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:1883".to_string(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: 60,
            clean_session: true,
            connect_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_interval: Duration::from_secs(5),
            topic_root: "reflow".to_string(),
            qos: 1,
            request_capacity: 100,
        }
    }
}

impl BrokerConfig {
    /// Parse address into host and port
    pub fn parse_address(&self) -> (String, u16) {
        if let Some((host, port_str)) = self.address.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
        (self.address.clone(), DEFAULT_MQTT_PORT)
    }

    /// Configured QoS, falling back to at-least-once for invalid levels
    pub fn qos(&self) -> QoS {
        QoS::from_level(self.qos).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        let config = BrokerConfig {
            address: "broker.example.com:8883".to_string(),
            ..Default::default()
        };
        let (host, port) = config.parse_address();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
    }

    #[test]
    fn test_parse_address_without_port() {
        let config = BrokerConfig {
            address: "broker.example.com".to_string(),
            ..Default::default()
        };
        let (host, port) = config.parse_address();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn test_qos_level_mapping() {
        let mut config = BrokerConfig::default();
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        config.qos = 0;
        assert_eq!(config.qos(), QoS::AtMostOnce);
        config.qos = 2;
        assert_eq!(config.qos(), QoS::ExactlyOnce);
    }
}
