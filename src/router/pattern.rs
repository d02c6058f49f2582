//! Topic patterns
//!
//! A pattern is a slash-delimited template relative to the topic root.
//! `{id}` marks the level carrying the entity identifier, `+` matches any
//! single level, anything else must match literally.

use super::Category;

/// Placeholder for the entity level
pub const ENTITY_PLACEHOLDER: &str = "{id}";

/// One level of a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternLevel {
    Literal(String),
    Entity,
    Any,
}

/// A compiled route pattern
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    levels: Vec<PatternLevel>,
    entity_index: usize,
    category: Category,
}

/// Levels captured by a successful match
#[derive(Debug, PartialEq, Eq)]
pub struct PatternMatch<'t> {
    pub entity_id: &'t str,
    pub subpath: Vec<&'t str>,
}

impl TopicPattern {
    /// Parse a pattern such as `sensors/{id}/data`
    pub fn parse(pattern: &str, category: Category) -> Result<Self, &'static str> {
        if pattern.is_empty() {
            return Err("pattern cannot be empty");
        }
        if pattern.starts_with('/') || pattern.ends_with('/') {
            return Err("pattern cannot start or end with '/'");
        }
        if pattern.contains('#') {
            return Err("multi-level wildcard is not allowed in patterns");
        }

        let mut levels = Vec::new();
        let mut entity_index = None;

        for (i, level) in pattern.split('/').enumerate() {
            let parsed = match level {
                "" => return Err("pattern cannot contain empty levels"),
                ENTITY_PLACEHOLDER => {
                    if entity_index.replace(i).is_some() {
                        return Err("pattern can only contain one {id} level");
                    }
                    PatternLevel::Entity
                }
                "+" => PatternLevel::Any,
                s if s.contains('+') || s.contains('{') || s.contains('}') => {
                    return Err("wildcards and placeholders must occupy an entire level");
                }
                s => PatternLevel::Literal(s.to_string()),
            };
            levels.push(parsed);
        }

        let entity_index = entity_index.ok_or("pattern must contain an {id} level")?;

        Ok(Self {
            source: pattern.to_string(),
            levels,
            entity_index,
            category,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// First level of the pattern
    pub fn namespace(&self) -> &str {
        match self.levels.first() {
            Some(PatternLevel::Literal(s)) => s,
            _ => "",
        }
    }

    /// Ranking used when several patterns match: more literal levels first,
    /// then the longer leading literal prefix.
    pub fn specificity(&self) -> (usize, usize) {
        let literals = self
            .levels
            .iter()
            .filter(|l| matches!(l, PatternLevel::Literal(_)))
            .count();
        let prefix = self
            .levels
            .iter()
            .take_while(|l| matches!(l, PatternLevel::Literal(_)))
            .count();
        (literals, prefix)
    }

    /// Match topic levels (root already stripped)
    pub fn matches<'t>(&self, levels: &[&'t str]) -> Option<PatternMatch<'t>> {
        if levels.len() != self.levels.len() {
            return None;
        }

        for (pattern, level) in self.levels.iter().zip(levels) {
            match pattern {
                PatternLevel::Literal(lit) if lit != level => return None,
                PatternLevel::Entity | PatternLevel::Any if level.is_empty() => return None,
                _ => {}
            }
        }

        Some(PatternMatch {
            entity_id: levels[self.entity_index],
            subpath: levels[self.entity_index + 1..].to_vec(),
        })
    }

    /// Broker subscription filter for this pattern under `root`
    pub fn filter(&self, root: &str) -> String {
        let mut filter = String::from(root);
        for level in &self.levels {
            filter.push('/');
            match level {
                PatternLevel::Literal(lit) => filter.push_str(lit),
                PatternLevel::Entity | PatternLevel::Any => filter.push('+'),
            }
        }
        filter
    }
}
