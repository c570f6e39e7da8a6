// State access events consumed by policies
//
// An event is constructed fresh for every get/set and is immutable from the
// policy's point of view. Pipeline substitution produces a new event via
// `with_value` so later handlers in the chain observe the substituted value.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A read of a state field
#[derive(Debug, Clone)]
pub struct GetEvent {
    /// Name of the state field
    pub field: String,
    /// Value as seen at this point of the pipeline
    pub value: Value,
    /// When the read started
    pub timestamp: DateTime<Utc>,
}

impl GetEvent {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
            timestamp: Utc::now(),
        }
    }

    /// Clone of this event carrying a substituted value
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            field: self.field.clone(),
            value,
            timestamp: self.timestamp,
        }
    }
}

/// A write to a state field
#[derive(Debug, Clone)]
pub struct SetEvent {
    /// Name of the state field
    pub field: String,
    /// Stored value before the write
    pub previous: Value,
    /// Proposed value as seen at this point of the pipeline
    pub value: Value,
    /// When the write started
    pub timestamp: DateTime<Utc>,
}

impl SetEvent {
    pub fn new(field: impl Into<String>, previous: Value, value: Value) -> Self {
        Self {
            field: field.into(),
            previous,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Clone of this event carrying a transformed proposed value
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            field: self.field.clone(),
            previous: self.previous.clone(),
            value,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_value_keeps_previous() {
        let event = SetEvent::new("count", json!(1), json!(2));
        let substituted = event.with_value(json!(3));

        assert_eq!(substituted.previous, json!(1));
        assert_eq!(substituted.value, json!(3));
        assert_eq!(substituted.timestamp, event.timestamp);
    }
}
