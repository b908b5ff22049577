//! Workflow registration and event indexing.
//!
//! Registrations are indexed three ways for event lookup: exact event types
//! in a map, wildcard matchers in a set, and regex/list matchers in a set
//! that is scanned linearly per event.

use crate::error::OrchestratorError;
use crate::trigger::{EventMatcher, Trigger};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use switchyard_conversation::ConversationMemory;
use switchyard_core::WorkflowId;
use switchyard_event::Event;
use switchyard_workflow::{RunOptions, RunnerHooks, Workflow, WorkflowKind};

/// Run options fixed at registration time.
#[derive(Debug, Clone, Default)]
pub struct RunDefaults {
    /// Default run input.
    pub input: Option<JsonValue>,
    /// Default shared context.
    pub context: Option<JsonValue>,
    /// Default node parallelism.
    pub concurrency: Option<usize>,
    /// Default fail-fast behavior.
    pub fail_fast: Option<bool>,
    /// Default conversation id.
    pub conversation_id: Option<String>,
    /// Default memory, shallow-merged under per-invocation memory.
    pub memory: Option<ConversationMemory>,
    /// Lifecycle hooks for every run of this workflow.
    pub hooks: RunnerHooks,
}

/// Per-invocation run options; each set field wins over the registration
/// default, and memory is shallow-merged.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Run input.
    pub input: Option<JsonValue>,
    /// Shared context.
    pub context: Option<JsonValue>,
    /// Node parallelism.
    pub concurrency: Option<usize>,
    /// Fail-fast behavior.
    pub fail_fast: Option<bool>,
    /// Conversation id.
    pub conversation_id: Option<String>,
    /// Memory merged over the registration default.
    pub memory: Option<ConversationMemory>,
}

impl RunDefaults {
    /// Merges per-invocation overrides over these defaults into runner
    /// options.
    #[must_use]
    pub fn merged(&self, overrides: RunOverrides) -> RunOptions {
        let memory = match (self.memory.clone(), overrides.memory) {
            (None, None) => None,
            (Some(memory), None) | (None, Some(memory)) => Some(memory),
            (Some(mut base), Some(patch)) => {
                for (key, value) in patch {
                    base.insert(key, value);
                }
                Some(base)
            }
        };

        RunOptions {
            input: overrides
                .input
                .or_else(|| self.input.clone())
                .unwrap_or(JsonValue::Null),
            context: overrides
                .context
                .or_else(|| self.context.clone())
                .unwrap_or(JsonValue::Null),
            concurrency: overrides.concurrency.or(self.concurrency),
            fail_fast: overrides.fail_fast.or(self.fail_fast),
            conversation_id: overrides
                .conversation_id
                .or_else(|| self.conversation_id.clone()),
            memory,
            hooks: self.hooks.clone(),
        }
    }
}

/// A registered workflow with its trigger and defaults.
#[derive(Debug)]
pub struct WorkflowRegistration {
    /// The workflow definition.
    pub workflow: Workflow,
    /// How the workflow is invoked.
    pub trigger: Trigger,
    /// Registration-time run options.
    pub defaults: RunDefaults,
}

/// Summary of a registration, for introspection.
#[derive(Debug, Clone)]
pub struct RegisteredWorkflow {
    /// The workflow id.
    pub id: WorkflowId,
    /// The workflow name.
    pub name: String,
    /// The workflow kind.
    pub kind: WorkflowKind,
    /// Whether the trigger is event-driven.
    pub event_triggered: bool,
}

/// The workflow table with its three event indices.
#[derive(Default)]
pub(crate) struct WorkflowRegistry {
    by_id: HashMap<WorkflowId, Arc<WorkflowRegistration>>,
    by_event_type: HashMap<String, HashSet<WorkflowId>>,
    wildcard: HashSet<WorkflowId>,
    /// Regex and list matchers, scanned linearly per event.
    scanned: HashSet<WorkflowId>,
}

impl WorkflowRegistry {
    pub(crate) fn insert(
        &mut self,
        registration: WorkflowRegistration,
    ) -> Result<WorkflowId, OrchestratorError> {
        let workflow_id = registration.workflow.id;
        if self.by_id.contains_key(&workflow_id) {
            return Err(OrchestratorError::DuplicateWorkflow { workflow_id });
        }

        if let Trigger::Event(trigger) = &registration.trigger {
            match &trigger.matcher {
                EventMatcher::Exact(event_type) => {
                    self.by_event_type
                        .entry(event_type.clone())
                        .or_default()
                        .insert(workflow_id);
                }
                EventMatcher::Wildcard => {
                    self.wildcard.insert(workflow_id);
                }
                EventMatcher::Any(_) | EventMatcher::Pattern(_) => {
                    self.scanned.insert(workflow_id);
                }
            }
        }

        self.by_id.insert(workflow_id, Arc::new(registration));
        Ok(workflow_id)
    }

    pub(crate) fn remove(&mut self, workflow_id: WorkflowId) -> bool {
        let Some(registration) = self.by_id.remove(&workflow_id) else {
            return false;
        };
        if let Trigger::Event(trigger) = &registration.trigger {
            match &trigger.matcher {
                EventMatcher::Exact(event_type) => {
                    if let Some(bucket) = self.by_event_type.get_mut(event_type) {
                        bucket.remove(&workflow_id);
                        if bucket.is_empty() {
                            self.by_event_type.remove(event_type);
                        }
                    }
                }
                EventMatcher::Wildcard => {
                    self.wildcard.remove(&workflow_id);
                }
                EventMatcher::Any(_) | EventMatcher::Pattern(_) => {
                    self.scanned.remove(&workflow_id);
                }
            }
        }
        true
    }

    pub(crate) fn get(&self, workflow_id: WorkflowId) -> Option<Arc<WorkflowRegistration>> {
        self.by_id.get(&workflow_id).cloned()
    }

    pub(crate) fn summaries(&self) -> Vec<RegisteredWorkflow> {
        let mut summaries: Vec<RegisteredWorkflow> = self
            .by_id
            .values()
            .map(|registration| RegisteredWorkflow {
                id: registration.workflow.id,
                name: registration.workflow.name.clone(),
                kind: registration.workflow.kind,
                event_triggered: matches!(registration.trigger, Trigger::Event(_)),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// Registrations whose trigger accepts the event: exact matches, then
    /// wildcards, then the scanned set, each gated by the trigger filter.
    pub(crate) fn triggered_by(&self, event: &Event) -> Vec<Arc<WorkflowRegistration>> {
        let mut matched = Vec::new();

        let exact = self
            .by_event_type
            .get(&event.event_type)
            .into_iter()
            .flatten();
        for workflow_id in exact.chain(&self.wildcard).chain(&self.scanned) {
            let Some(registration) = self.by_id.get(workflow_id) else {
                continue;
            };
            if let Trigger::Event(trigger) = &registration.trigger
                && trigger.accepts(event)
            {
                matched.push(Arc::clone(registration));
            }
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::EventTrigger;
    use regex::Regex;
    use serde_json::json;
    use std::sync::Arc as StdArc;
    use switchyard_workflow::{Node, NodeHandler};

    fn noop_handler() -> NodeHandler {
        StdArc::new(|_context| Box::pin(async { Ok(JsonValue::Null) }))
    }

    fn workflow(name: &str) -> Workflow {
        let mut workflow = Workflow::new(name);
        workflow
            .add_node(Node::new("only", noop_handler()))
            .unwrap();
        workflow
    }

    fn registration(name: &str, trigger: Trigger) -> WorkflowRegistration {
        WorkflowRegistration {
            workflow: workflow(name),
            trigger,
            defaults: RunDefaults::default(),
        }
    }

    fn event(event_type: &str) -> Event {
        Event::new(event_type, json!({})).unwrap()
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = WorkflowRegistry::default();
        let reg = registration("w", Trigger::Manual);
        let dup = WorkflowRegistration {
            workflow: reg.workflow.clone(),
            trigger: Trigger::Manual,
            defaults: RunDefaults::default(),
        };

        registry.insert(reg).unwrap();
        assert!(matches!(
            registry.insert(dup),
            Err(OrchestratorError::DuplicateWorkflow { .. })
        ));
    }

    #[test]
    fn lookup_unions_all_matcher_variants() {
        let mut registry = WorkflowRegistry::default();
        let exact = registry
            .insert(registration("exact", Trigger::on_event("order.created")))
            .unwrap();
        let wild = registry
            .insert(registration("wild", Trigger::on_any_event()))
            .unwrap();
        let pattern = registry
            .insert(registration(
                "pattern",
                Trigger::Event(EventTrigger::new(EventMatcher::Pattern(
                    Regex::new(r"^order\.").unwrap(),
                ))),
            ))
            .unwrap();
        let listed = registry
            .insert(registration(
                "listed",
                Trigger::Event(EventTrigger::new(EventMatcher::Any(vec![
                    "order.created".to_string(),
                ]))),
            ))
            .unwrap();
        registry
            .insert(registration("other", Trigger::on_event("user.created")))
            .unwrap();

        let matched: HashSet<WorkflowId> = registry
            .triggered_by(&event("order.created"))
            .iter()
            .map(|r| r.workflow.id)
            .collect();
        assert_eq!(
            matched,
            HashSet::from([exact, wild, pattern, listed])
        );
    }

    #[test]
    fn trigger_filter_applies_after_matching() {
        let mut registry = WorkflowRegistry::default();
        registry
            .insert(registration(
                "filtered",
                Trigger::Event(
                    EventTrigger::new(EventMatcher::Wildcard)
                        .with_filter(StdArc::new(|event| event.payload["keep"] == json!(true))),
                ),
            ))
            .unwrap();

        assert!(registry.triggered_by(&event("x")).is_empty());

        let kept = Event::new("x", json!({ "keep": true })).unwrap();
        assert_eq!(registry.triggered_by(&kept).len(), 1);
    }

    #[test]
    fn remove_cleans_every_index() {
        let mut registry = WorkflowRegistry::default();
        let id = registry
            .insert(registration("w", Trigger::on_event("t")))
            .unwrap();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.get(id).is_none());
        assert!(registry.triggered_by(&event("t")).is_empty());
    }

    #[test]
    fn manual_workflows_never_match_events() {
        let mut registry = WorkflowRegistry::default();
        registry.insert(registration("manual", Trigger::Manual)).unwrap();
        assert!(registry.triggered_by(&event("anything")).is_empty());
    }

    #[test]
    fn merged_overrides_win_per_field() {
        let mut default_memory = ConversationMemory::new();
        default_memory.insert("a".to_string(), json!(1));
        default_memory.insert("b".to_string(), json!(1));

        let defaults = RunDefaults {
            input: Some(json!("default-input")),
            context: Some(json!("default-context")),
            concurrency: Some(2),
            fail_fast: Some(false),
            conversation_id: Some("default-conv".to_string()),
            memory: Some(default_memory),
            hooks: RunnerHooks::default(),
        };

        let mut override_memory = ConversationMemory::new();
        override_memory.insert("b".to_string(), json!(2));

        let options = defaults.merged(RunOverrides {
            input: Some(json!("override-input")),
            conversation_id: Some("override-conv".to_string()),
            memory: Some(override_memory),
            ..RunOverrides::default()
        });

        assert_eq!(options.input, json!("override-input"));
        assert_eq!(options.context, json!("default-context"));
        assert_eq!(options.concurrency, Some(2));
        assert_eq!(options.fail_fast, Some(false));
        assert_eq!(options.conversation_id.as_deref(), Some("override-conv"));
        let memory = options.memory.unwrap();
        assert_eq!(memory.get("a"), Some(&json!(1)));
        assert_eq!(memory.get("b"), Some(&json!(2)));
    }
}
