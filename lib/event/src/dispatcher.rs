//! Event dispatcher with typed and wildcard subscriptions.
//!
//! Subscribers register against an exact event type or the `"*"` wildcard.
//! A dispatch delivers the event to every matching subscriber sequentially,
//! in registration order (typed bucket first, then wildcard bucket), and
//! collects filter and handler failures instead of propagating them.

use crate::event::Event;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use switchyard_core::{BoxError, ErrorInfo, SubscriberId};

/// Async event handler invoked for each matching subscriber.
pub type SubscriberHandler =
    Arc<dyn Fn(Event, DispatchContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Predicate deciding whether a subscriber receives an event.
pub type SubscriberFilter = Arc<dyn Fn(&Event) -> Result<bool, BoxError> + Send + Sync>;

/// Options accepted by [`EventDispatcher::subscribe`].
#[derive(Default)]
pub struct SubscribeOptions {
    /// Human-readable name for diagnostics.
    pub name: Option<String>,
    /// Remove the subscriber after its first executed delivery.
    pub once: bool,
    /// Per-subscriber predicate; a `false` result skips delivery.
    pub filter: Option<SubscriberFilter>,
}

impl SubscribeOptions {
    /// Sets the diagnostic name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the subscription as one-shot.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Sets the delivery filter.
    #[must_use]
    pub fn with_filter(mut self, filter: SubscriberFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A registered subscriber.
#[derive(Clone)]
pub struct Subscriber {
    /// Unique identifier for this subscription.
    pub id: SubscriberId,
    /// The type pattern this subscriber matches (exact type or `"*"`).
    pub pattern: String,
    /// Diagnostic name, if any.
    pub name: Option<String>,
    /// Whether the subscription is removed after its first execution.
    pub once: bool,
    filter: Option<SubscriberFilter>,
    handler: SubscriberHandler,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("name", &self.name)
            .field("once", &self.once)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Context handed to subscriber handlers.
///
/// Carries a clone of the dispatcher handle so handlers can manage
/// subscriptions (e.g. unsubscribe themselves) without back-references.
#[derive(Clone)]
pub struct DispatchContext {
    /// The subscriber being invoked.
    pub subscriber_id: SubscriberId,
    /// The type of the event being delivered.
    pub event_type: String,
    /// Handle to the dispatching registry.
    pub dispatcher: EventDispatcher,
}

/// Which stage of delivery produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    /// The subscriber's filter failed.
    Filter,
    /// The subscriber's handler failed.
    Handler,
}

/// A single collected delivery failure.
#[derive(Debug, Clone)]
pub struct DispatchError {
    /// The subscriber whose filter or handler failed.
    pub subscriber_id: SubscriberId,
    /// The stage that failed.
    pub stage: DispatchStage,
    /// The captured error.
    pub error: ErrorInfo,
}

/// Outcome of a single dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// The event that was dispatched.
    pub event: Event,
    /// Number of handlers that completed successfully.
    pub delivered: usize,
    /// Collected filter and handler failures.
    pub errors: Vec<DispatchError>,
}

/// Wildcard pattern matching every event type.
pub const WILDCARD: &str = "*";

#[derive(Default)]
struct DispatcherState {
    /// Subscriber ids per type pattern, in registration order.
    by_pattern: HashMap<String, Vec<SubscriberId>>,
    /// All live subscribers by id.
    by_id: HashMap<SubscriberId, Subscriber>,
}

/// The subscriber registry and dispatch engine.
///
/// Cheaply clonable; clones share the same registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    state: Arc<Mutex<DispatcherState>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for the given type pattern.
    ///
    /// The pattern is either an exact event type or [`WILDCARD`].
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: SubscriberHandler,
        options: SubscribeOptions,
    ) -> Subscriber {
        let subscriber = Subscriber {
            id: SubscriberId::new(),
            pattern: pattern.into(),
            name: options.name,
            once: options.once,
            filter: options.filter,
            handler,
        };

        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state
            .by_pattern
            .entry(subscriber.pattern.clone())
            .or_default()
            .push(subscriber.id);
        state.by_id.insert(subscriber.id, subscriber.clone());
        subscriber
    }

    /// Removes a subscriber. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        let Some(subscriber) = state.by_id.remove(&id) else {
            return false;
        };
        if let Some(bucket) = state.by_pattern.get_mut(&subscriber.pattern) {
            bucket.retain(|entry| *entry != id);
            if bucket.is_empty() {
                state.by_pattern.remove(&subscriber.pattern);
            }
        }
        true
    }

    /// Removes all subscribers for a pattern, or every subscriber when no
    /// pattern is given.
    pub fn clear(&self, pattern: Option<&str>) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        match pattern {
            Some(pattern) => {
                if let Some(bucket) = state.by_pattern.remove(pattern) {
                    for id in bucket {
                        state.by_id.remove(&id);
                    }
                }
            }
            None => {
                state.by_pattern.clear();
                state.by_id.clear();
            }
        }
    }

    /// Total number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .expect("dispatcher lock poisoned")
            .by_id
            .len()
    }

    /// Returns whether any subscriber would match the given event type.
    #[must_use]
    pub fn has_subscribers(&self, event_type: &str) -> bool {
        let state = self.state.lock().expect("dispatcher lock poisoned");
        state.by_pattern.contains_key(event_type) || state.by_pattern.contains_key(WILDCARD)
    }

    /// Dispatches an event to all matching subscribers.
    ///
    /// Subscribers are invoked sequentially: the typed bucket in
    /// registration order, then the wildcard bucket. Filter and handler
    /// failures are collected into the result; this method never fails.
    pub async fn dispatch(&self, event: Event) -> DispatchResult {
        let targets = self.targets_for(&event.event_type);

        let mut delivered = 0;
        let mut errors = Vec::new();

        for subscriber in targets {
            if let Some(filter) = &subscriber.filter {
                match filter(&event) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => {
                        errors.push(DispatchError {
                            subscriber_id: subscriber.id,
                            stage: DispatchStage::Filter,
                            error: ErrorInfo::from(&error),
                        });
                        continue;
                    }
                }
            }

            let context = DispatchContext {
                subscriber_id: subscriber.id,
                event_type: event.event_type.clone(),
                dispatcher: self.clone(),
            };
            match (subscriber.handler)(event.clone(), context).await {
                Ok(()) => delivered += 1,
                Err(error) => errors.push(DispatchError {
                    subscriber_id: subscriber.id,
                    stage: DispatchStage::Handler,
                    error: ErrorInfo::from(&error),
                }),
            }

            // One-shot subscribers go away after any executed delivery,
            // including a failed one. Filtered-out deliveries never count.
            if subscriber.once {
                self.unsubscribe(subscriber.id);
            }
        }

        DispatchResult {
            event,
            delivered,
            errors,
        }
    }

    /// Snapshots the target set for an event type: the typed bucket followed
    /// by the wildcard bucket.
    fn targets_for(&self, event_type: &str) -> Vec<Subscriber> {
        let state = self.state.lock().expect("dispatcher lock poisoned");
        let mut patterns = vec![event_type];
        if event_type != WILDCARD {
            patterns.push(WILDCARD);
        }
        let mut targets = Vec::new();
        for pattern in patterns {
            if let Some(bucket) = state.by_pattern.get(pattern) {
                targets.extend(bucket.iter().filter_map(|id| state.by_id.get(id)).cloned());
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> Event {
        Event::new(event_type, json!({})).unwrap()
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> SubscriberHandler {
        Arc::new(move |_event, _context| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_handler(message: &'static str) -> SubscriberHandler {
        Arc::new(move |_event, _context| {
            Box::pin(async move { Err::<(), BoxError>(message.into()) })
        })
    }

    #[tokio::test]
    async fn dispatch_reaches_typed_and_wildcard() {
        let dispatcher = EventDispatcher::new();
        let typed = Arc::new(AtomicUsize::new(0));
        let wild = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            "order.created",
            counting_handler(Arc::clone(&typed)),
            SubscribeOptions::default(),
        );
        dispatcher.subscribe(
            WILDCARD,
            counting_handler(Arc::clone(&wild)),
            SubscribeOptions::default(),
        );

        let result = dispatcher.dispatch(event("order.created")).await;
        assert_eq!(result.delivered, 2);
        assert!(result.errors.is_empty());
        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 1);

        // A different type only reaches the wildcard subscriber.
        let result = dispatcher.dispatch(event("order.deleted")).await;
        assert_eq!(result.delivered, 1);
        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn filter_false_skips_without_error() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            "metric",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default().with_filter(Arc::new(|event| {
                Ok(event.payload.get("keep").is_some())
            })),
        );

        let result = dispatcher.dispatch(event("metric")).await;
        assert_eq!(result.delivered, 0);
        assert!(result.errors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filter_failure_recorded_and_skipped() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            "metric",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default()
                .with_filter(Arc::new(|_event| Err("filter exploded".into()))),
        );

        let result = dispatcher.dispatch(event("metric")).await;
        assert_eq!(result.delivered, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, DispatchStage::Filter);
        assert_eq!(result.errors[0].error.message, "filter exploded");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_recorded_not_delivered() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(
            "job.run",
            failing_handler("boom"),
            SubscribeOptions::default(),
        );

        let result = dispatcher.dispatch(event("job.run")).await;
        assert_eq!(result.delivered, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, DispatchStage::Handler);
        assert_eq!(result.errors[0].error.message, "boom");
    }

    #[tokio::test]
    async fn once_removed_even_when_handler_fails() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(
            "job.run",
            failing_handler("boom"),
            SubscribeOptions::default().once(),
        );
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.dispatch(event("job.run")).await;
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn once_survives_filtered_out_delivery() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            "metric",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default()
                .once()
                .with_filter(Arc::new(|event| {
                    Ok(event.payload.get("keep").is_some())
                })),
        );

        // Filter returns false: not executed, so the subscription stays.
        dispatcher.dispatch(event("metric")).await;
        assert_eq!(dispatcher.subscriber_count(), 1);

        let kept = Event::new("metric", json!({ "keep": true })).unwrap();
        let result = dispatcher.dispatch(kept).await;
        assert_eq!(result.delivered, 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_and_clear() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let subscriber = dispatcher.subscribe(
            "a",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default().named("first"),
        );
        dispatcher.subscribe(
            "b",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default(),
        );

        assert!(dispatcher.unsubscribe(subscriber.id));
        assert!(!dispatcher.unsubscribe(subscriber.id));
        assert!(!dispatcher.has_subscribers("a"));

        dispatcher.clear(Some("b"));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn handler_can_unsubscribe_itself_via_context() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(
            "ping",
            Arc::new(|_event, context: DispatchContext| {
                Box::pin(async move {
                    context.dispatcher.unsubscribe(context.subscriber_id);
                    Ok(())
                })
            }),
            SubscribeOptions::default(),
        );

        let result = dispatcher.dispatch(event("ping")).await;
        assert_eq!(result.delivered, 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn delivered_plus_errors_bounded_by_targets() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            "t",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default(),
        );
        dispatcher.subscribe("t", failing_handler("x"), SubscribeOptions::default());
        dispatcher.subscribe(
            "t",
            counting_handler(Arc::clone(&calls)),
            SubscribeOptions::default().with_filter(Arc::new(|_| Ok(false))),
        );

        let result = dispatcher.dispatch(event("t")).await;
        assert_eq!(result.delivered, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.delivered + result.errors.len() <= 3);
    }
}
