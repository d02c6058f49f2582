//! Topic Router
//!
//! Classifies an incoming topic string into a category and extracts the
//! entity identifier. Classification is a pure function of the topic and
//! the pattern table; it never fails, unmatched topics route to
//! [`Category::Unknown`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use levels::{validate_topic_filter, validate_topic_name};
pub use pattern::{PatternLevel, PatternMatch, TopicPattern, ENTITY_PLACEHOLDER};

use crate::config::RouteConfig;

mod levels;
mod pattern;


/// Kind of message a topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SensorData,
    SystemStatus,
    LiquidLevel,
    ImagingPayload,
    Alert,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SensorData => "sensor_data",
            Category::SystemStatus => "system_status",
            Category::LiquidLevel => "liquid_level",
            Category::ImagingPayload => "imaging_payload",
            Category::Alert => "alert",
            Category::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of routing one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub category: Category,
    /// Entity id from the `{id}` level; empty for Unknown
    pub entity_id: String,
    /// Levels after the entity level
    pub subpath: Vec<String>,
    /// First level after the root
    pub namespace: String,
    /// Full original topic
    pub topic: String,
}

impl TopicDescriptor {
    fn unknown(topic: &str, namespace: &str) -> Self {
        Self {
            category: Category::Unknown,
            entity_id: String::new(),
            subpath: Vec::new(),
            namespace: namespace.to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.category == Category::Unknown
    }
}

/// Built-in pattern table, relative to the topic root
const DEFAULT_ROUTES: &[(&str, Category)] = &[
    ("sensors/{id}/data", Category::SensorData),
    ("system/{id}/status", Category::SystemStatus),
    ("filtration/{id}/status", Category::SystemStatus),
    ("pumps/{id}/status", Category::SystemStatus),
    ("liquid/{id}/level", Category::LiquidLevel),
    ("uv/camera/{id}", Category::ImagingPayload),
    ("uv/camera/{id}/+", Category::ImagingPayload),
    // Our own camera commands come back on the subscription; never decode them
    ("uv/camera/{id}/commands", Category::Unknown),
    ("alerts/{id}", Category::Alert),
];

/// Pattern table lookup
#[derive(Debug, Clone)]
pub struct TopicRouter {
    root: String,
    /// Table order
    patterns: Vec<TopicPattern>,
    /// Indices into `patterns`, most specific first
    ranked: Vec<usize>,
}

impl TopicRouter {
    /// Router with the built-in table under `root`
    pub fn new(root: impl Into<String>) -> Self {
        let patterns = DEFAULT_ROUTES
            .iter()
            .filter_map(|(p, c)| TopicPattern::parse(p, *c).ok())
            .collect();
        Self::from_patterns(root.into(), patterns)
    }

    /// Router with the built-in table plus configured routes
    pub fn with_routes(root: impl Into<String>, routes: &[RouteConfig]) -> Result<Self, String> {
        let mut router = Self::new(root);
        let mut patterns = std::mem::take(&mut router.patterns);
        for route in routes {
            let pattern = TopicPattern::parse(&route.pattern, route.category)
                .map_err(|e| format!("route '{}': {}", route.pattern, e))?;
            patterns.push(pattern);
        }
        Ok(Self::from_patterns(router.root, patterns))
    }

    fn from_patterns(root: String, patterns: Vec<TopicPattern>) -> Self {
        let mut ranked: Vec<usize> = (0..patterns.len()).collect();
        // Stable sort keeps table order among equally specific patterns
        ranked.sort_by(|a, b| patterns[*b].specificity().cmp(&patterns[*a].specificity()));
        Self {
            root,
            patterns,
            ranked,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn patterns(&self) -> &[TopicPattern] {
        &self.patterns
    }

    /// Classify a topic
    pub fn route(&self, topic: &str) -> TopicDescriptor {
        if levels::validate_topic_name(topic).is_err() {
            return TopicDescriptor::unknown(topic, "");
        }

        let relative = match topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) => rest,
            None => return TopicDescriptor::unknown(topic, ""),
        };

        let levels: SmallVec<[&str; 8]> = relative.split('/').collect();
        let namespace = levels.first().copied().unwrap_or("");

        for &index in &self.ranked {
            let pattern = &self.patterns[index];
            if let Some(m) = pattern.matches(&levels) {
                if pattern.category() == Category::Unknown {
                    return TopicDescriptor::unknown(topic, namespace);
                }
                return TopicDescriptor {
                    category: pattern.category(),
                    entity_id: m.entity_id.to_string(),
                    subpath: m.subpath.iter().map(|s| s.to_string()).collect(),
                    namespace: namespace.to_string(),
                    topic: topic.to_string(),
                };
            }
        }

        TopicDescriptor::unknown(topic, namespace)
    }

    /// Broker subscription filters for every routable pattern, in table order
    pub fn subscription_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            if pattern.category() == Category::Unknown {
                continue;
            }
            let filter = pattern.filter(&self.root);
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        filters
    }
}
