//! Workflow triggers.
//!
//! A trigger declares how a registered workflow is invoked: manually, or by
//! events whose type matches one of four matcher variants. Event triggers
//! can also carry mappers deriving run input, context, and the conversation
//! id from the incoming event.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use switchyard_event::Event;

/// Predicate applied after matching; `false` drops the invocation.
pub type TriggerFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Derives a run value from the triggering event.
pub type EventMapper = Arc<dyn Fn(&Event) -> JsonValue + Send + Sync>;

/// Derives the conversation id from the triggering event.
pub type ConversationIdMapper = Arc<dyn Fn(&Event) -> Option<String> + Send + Sync>;

/// How an event trigger matches event types.
#[derive(Debug, Clone)]
pub enum EventMatcher {
    /// Exact event type.
    Exact(String),
    /// Any of the listed event types.
    Any(Vec<String>),
    /// Event types matching a regular expression.
    Pattern(Regex),
    /// Every event type.
    Wildcard,
}

impl EventMatcher {
    /// Returns whether the matcher accepts an event type.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == event_type,
            Self::Any(types) => types.iter().any(|t| t == event_type),
            Self::Pattern(pattern) => pattern.is_match(event_type),
            Self::Wildcard => true,
        }
    }
}

/// An event-driven trigger.
#[derive(Clone)]
pub struct EventTrigger {
    /// The matcher deciding which events invoke the workflow.
    pub matcher: EventMatcher,
    /// Optional post-match predicate.
    pub filter: Option<TriggerFilter>,
    /// Derives the run input; defaults to the event payload.
    pub map_input: Option<EventMapper>,
    /// Derives the run context.
    pub map_context: Option<EventMapper>,
    /// Derives the conversation id; required for chatflows.
    pub map_conversation_id: Option<ConversationIdMapper>,
}

impl EventTrigger {
    /// Creates a trigger with the given matcher and no mappers.
    #[must_use]
    pub fn new(matcher: EventMatcher) -> Self {
        Self {
            matcher,
            filter: None,
            map_input: None,
            map_context: None,
            map_conversation_id: None,
        }
    }

    /// Sets the post-match filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TriggerFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the input mapper.
    #[must_use]
    pub fn with_map_input(mut self, map_input: EventMapper) -> Self {
        self.map_input = Some(map_input);
        self
    }

    /// Sets the context mapper.
    #[must_use]
    pub fn with_map_context(mut self, map_context: EventMapper) -> Self {
        self.map_context = Some(map_context);
        self
    }

    /// Sets the conversation-id mapper.
    #[must_use]
    pub fn with_map_conversation_id(mut self, mapper: ConversationIdMapper) -> Self {
        self.map_conversation_id = Some(mapper);
        self
    }

    /// Returns whether the trigger accepts an event, matcher and filter
    /// included.
    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        self.matcher.matches(&event.event_type)
            && self.filter.as_ref().is_none_or(|filter| filter(event))
    }
}

impl fmt::Debug for EventTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTrigger")
            .field("matcher", &self.matcher)
            .field("filter", &self.filter.is_some())
            .field("map_input", &self.map_input.is_some())
            .field("map_context", &self.map_context.is_some())
            .field("map_conversation_id", &self.map_conversation_id.is_some())
            .finish()
    }
}

/// How a registered workflow is invoked.
#[derive(Debug, Clone, Default)]
pub enum Trigger {
    /// Only via `run_workflow`.
    #[default]
    Manual,
    /// By matching events.
    Event(EventTrigger),
}

impl Trigger {
    /// Shorthand for an exact-type event trigger.
    #[must_use]
    pub fn on_event(event_type: impl Into<String>) -> Self {
        Self::Event(EventTrigger::new(EventMatcher::Exact(event_type.into())))
    }

    /// Shorthand for a wildcard event trigger.
    #[must_use]
    pub fn on_any_event() -> Self {
        Self::Event(EventTrigger::new(EventMatcher::Wildcard))
    }
}
