//! Topic: the routing key that partitions requests into worker pools.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::CourierError;

/// A validated, non-empty routing key.
///
/// A topic is immutable after creation and decides which worker pool may
/// claim a request. An empty key is rejected before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn new(s: impl Into<String>) -> Result<Self, CourierError> {
        let s = s.into();
        if s.is_empty() {
            return Err(CourierError::Validation("topic must not be empty".into()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_topic_is_rejected() {
        let err = Topic::new("").unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[test]
    fn non_empty_topic_roundtrips() {
        let t = Topic::new("reports").unwrap();
        assert_eq!(t.as_str(), "reports");

        let s = serde_json::to_string(&t).unwrap();
        assert_eq!(s, "\"reports\"");
        let back: Topic = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }
}
