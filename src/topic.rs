//! Hierarchical topic filters.
//!
//! Filters follow MQTT semantics: levels are separated by `/`, `+` matches
//! exactly one level and `#` (only as the final level) matches the remainder
//! of the topic, including the parent level itself.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Filter for repository liveness checks.
pub const TEST_TOPIC: &str = "+/discovery/+/test";

/// Filter for device description query requests.
pub const QUERY_TOPIC: &str = "+/discovery/+/query";

/// Filter for subscription cancel requests.
pub const CANCEL_TOPIC: &str = "+/discovery/+/cancel";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Level {
    Exact(String),
    SingleWildcard,
    MultiWildcard,
}

/// A parsed topic filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    /// Parses and validates a topic filter.
    pub fn parse(filter: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidTopicFilter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        };

        if filter.is_empty() {
            return Err(invalid("filter must not be empty"));
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let mut levels = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            let level = match *part {
                "+" => Level::SingleWildcard,
                "#" if idx + 1 == parts.len() => Level::MultiWildcard,
                "#" => return Err(invalid("'#' is only allowed as the last level")),
                p if p.contains('+') || p.contains('#') => {
                    return Err(invalid("wildcards must occupy a whole level"));
                }
                p => Level::Exact(p.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: filter.to_string(),
            levels,
        })
    }

    /// The filter as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the filter contains no wildcard levels.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.levels.iter().all(|l| matches!(l, Level::Exact(_)))
    }

    /// Checks whether a concrete topic name matches this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');

        for level in &self.levels {
            match level {
                Level::MultiWildcard => return true,
                Level::SingleWildcard => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Level::Exact(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for TopicFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard_matches_one_segment() {
        let filter = TopicFilter::parse(QUERY_TOPIC).unwrap();
        assert!(filter.matches("org42/discovery/dev7/query"));
        assert!(!filter.matches("org42/discovery/query"));
        assert!(!filter.matches("org42/discovery/dev7/extra/query"));
        assert!(!filter.matches("org42/discovery/dev7/test"));
    }

    #[test]
    fn single_level_wildcard_matches_empty_segment() {
        let filter = TopicFilter::parse("+/discovery/+/test").unwrap();
        assert!(filter.matches("/discovery//test"));
    }

    #[test]
    fn multi_level_wildcard_matches_remainder() {
        let filter = TopicFilter::parse("repo/#").unwrap();
        assert!(filter.matches("repo"));
        assert!(filter.matches("repo/a"));
        assert!(filter.matches("repo/a/b/c"));
        assert!(!filter.matches("other/a"));
    }

    #[test]
    fn exact_filter_requires_identical_topic() {
        let filter = TopicFilter::parse("platform/notifications").unwrap();
        assert!(filter.is_exact());
        assert!(filter.matches("platform/notifications"));
        assert!(!filter.matches("platform/notifications/x"));
        assert!(!filter.matches("platform"));
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(TopicFilter::parse("").is_err());
        assert!(TopicFilter::parse("a/#/b").is_err());
        assert!(TopicFilter::parse("a/b+/c").is_err());
        assert!(TopicFilter::parse("a/#x").is_err());
    }

    #[test]
    fn display_round_trips_raw_filter() {
        let filter: TopicFilter = CANCEL_TOPIC.parse().unwrap();
        assert_eq!(filter.to_string(), CANCEL_TOPIC);
        assert!(!filter.is_exact());
    }
}
