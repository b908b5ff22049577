//! The event value type.
//!
//! Events are immutable once constructed: a system-generated id, a non-empty
//! type string, an arbitrary JSON payload, a timestamp, and correlation
//! metadata. Producers publish them; the dispatcher and triggered workflows
//! consume them.

use crate::error::EventError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchyard_core::EventId;

/// Correlation metadata attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Id correlating this event with a larger operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Id of the event or command that caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// The component that produced this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form tags for filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An immutable event value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// The event type used for subscription and trigger matching.
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub payload: JsonValue,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Correlation metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates a new event with a generated id and the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyType`] if the type is empty or
    /// whitespace-only.
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Result<Self, EventError> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(EventError::EmptyType);
        }
        Ok(Self {
            id: EventId::new(),
            event_type,
            payload,
            timestamp: Utc::now(),
            metadata: EventMetadata::default(),
        })
    }

    /// Sets the producing component.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the causation id.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.metadata.causation_id = Some(causation_id.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    /// Replaces the metadata wholesale.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_creation() {
        let event = Event::new("order.created", serde_json::json!({"id": 42})).unwrap();
        assert_eq!(event.event_type, "order.created");
        assert_eq!(event.payload["id"], 42);
        assert!(event.id.to_string().starts_with("evt_"));
    }

    #[test]
    fn empty_type_rejected() {
        let result = Event::new("", JsonValue::Null);
        assert_eq!(result.unwrap_err(), EventError::EmptyType);

        let result = Event::new("   ", JsonValue::Null);
        assert_eq!(result.unwrap_err(), EventError::EmptyType);
    }

    #[test]
    fn metadata_builder() {
        let event = Event::new("ping", JsonValue::Null)
            .unwrap()
            .with_source("health-checker")
            .with_correlation_id("corr-1")
            .with_causation_id("cause-1")
            .with_tag("infra")
            .with_tag("low-priority");

        assert_eq!(event.metadata.source.as_deref(), Some("health-checker"));
        assert_eq!(event.metadata.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(event.metadata.causation_id.as_deref(), Some("cause-1"));
        assert_eq!(event.metadata.tags, vec!["infra", "low-priority"]);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = Event::new("user.updated", serde_json::json!({"name": "sam"}))
            .unwrap()
            .with_source("api");
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, parsed);
    }
}
