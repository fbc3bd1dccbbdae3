//! Configuration change records

use crate::Environment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Immutable record of one applied configuration change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// When the change was applied
    pub timestamp: DateTime<Utc>,
    /// Dotted path of the changed leaf
    pub path: String,
    /// Value before the change
    pub previous_value: Value,
    /// Value after the change
    pub new_value: Value,
    /// Actor that applied the change
    pub changed_by: String,
    /// Free-form justification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Environment of the tree the change was applied to
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
}

impl ConfigChangeEvent {
    /// Create a new change event stamped now
    pub fn new(
        path: impl Into<String>,
        previous_value: Value,
        new_value: Value,
        changed_by: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path: path.into(),
            previous_value,
            new_value,
            changed_by: changed_by.into(),
            reason: None,
            environment,
            previous_version: None,
            new_version: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_versions(mut self, previous: Option<String>, new: Option<String>) -> Self {
        self.previous_version = previous;
        self.new_version = new;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_camel_case() {
        let event = ConfigChangeEvent::new(
            "worker.concurrency",
            json!(4),
            json!(16),
            "ops",
            Environment::Development,
        )
        .with_reason(Some("scale up".to_string()));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["previousValue"], json!(4));
        assert_eq!(value["newValue"], json!(16));
        assert_eq!(value["changedBy"], json!("ops"));
        assert_eq!(value["reason"], json!("scale up"));
        assert!(value.get("newVersion").is_none());
    }
}
