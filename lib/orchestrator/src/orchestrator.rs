//! The orchestrator: queue loop, dispatch, triggered workflows, cron
//! wiring, and lifecycle.
//!
//! Producers publish events onto the queue; the worker loop dequeues them
//! bounded by `max_concurrent_events` and, for each event, dispatches to
//! subscribers while fanning out to triggered workflows bounded by
//! `workflow_concurrency`. Chatflow runs serialize per conversation through
//! a local chain and, when configured, a distributed lease.

use crate::config::{AckPolicy, Mode, OrchestratorConfig, WorkflowErrorContext};
use crate::conversation::{ConversationChains, ConversationLease};
use crate::error::OrchestratorError;
use crate::registry::{
    RegisteredWorkflow, RunDefaults, RunOverrides, WorkflowRegistration, WorkflowRegistry,
};
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use switchyard_core::{BoxError, JobId, WorkflowId};
use switchyard_event::{
    Event, EventDispatcher, EventMetadata, EventQueue, InMemoryEventQueue, QueueMessage,
    SubscribeOptions, Subscriber, SubscriberHandler,
};
use switchyard_scheduler::CronScheduler;
use switchyard_workflow::{
    Workflow, WorkflowKind, WorkflowRunResult, WorkflowRunner, to_run_record,
};
use tokio::sync::{Notify, Semaphore};

/// Counters accumulated over the orchestrator's lifetime.
#[derive(Default)]
struct Metrics {
    published: AtomicU64,
    processed: AtomicU64,
    dispatch_errors: AtomicU64,
    workflow_runs: AtomicU64,
    workflow_errors: AtomicU64,
}

impl Metrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dispatch_errors: self.dispatch_errors.load(Ordering::Relaxed),
            workflow_runs: self.workflow_runs.load(Ordering::Relaxed),
            workflow_errors: self.workflow_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Events published through this orchestrator.
    pub published: u64,
    /// Events processed by the worker loop.
    pub processed: u64,
    /// Subscriber filter and handler failures observed.
    pub dispatch_errors: u64,
    /// Triggered workflow runs launched.
    pub workflow_runs: u64,
    /// Triggered workflow runs that failed.
    pub workflow_errors: u64,
}

/// Immutable orchestrator state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Whether the orchestrator is running.
    pub is_running: bool,
    /// The configured mode.
    pub mode: Mode,
    /// Messages currently queued.
    pub queue_size: usize,
    /// Lifetime counters.
    pub metrics: MetricsSnapshot,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of processing one event, for ack accounting.
#[derive(Debug, Clone, Copy)]
struct EventOutcome {
    dispatch_errors: usize,
    workflow_failures: usize,
}

impl EventOutcome {
    fn is_clean(&self) -> bool {
        self.dispatch_errors == 0 && self.workflow_failures == 0
    }
}

struct Inner {
    mode: Mode,
    ack_policy: AckPolicy,
    max_concurrent_events: usize,
    workflow_concurrency: usize,
    dispatcher: EventDispatcher,
    queue: Arc<dyn EventQueue>,
    runner: WorkflowRunner,
    registry: Mutex<WorkflowRegistry>,
    scheduler: Option<Arc<dyn CronScheduler>>,
    conversation_store: Option<Arc<dyn switchyard_conversation::ConversationStore>>,
    conversation_lock: Option<Arc<dyn switchyard_scheduler::DistributedLock>>,
    conversation_lock_ttl: std::time::Duration,
    conversation_lock_refresh: std::time::Duration,
    conversation_lock_retry_count: u32,
    conversation_lock_retry_delay: std::time::Duration,
    conversation_lock_key_prefix: String,
    run_store: Option<Arc<dyn switchyard_workflow::RunStore>>,
    on_workflow_error: Option<crate::config::WorkflowErrorHandler>,
    on_run_store_error: Option<crate::config::RunStoreErrorHandler>,
    running: AtomicBool,
    in_flight: AtomicUsize,
    completion: Notify,
    /// Held by the single active queue-processing pass.
    loop_lock: tokio::sync::Mutex<()>,
    chains: ConversationChains,
    metrics: Metrics,
}

/// The event-driven workflow orchestrator.
///
/// Cheaply clonable; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator from the given configuration.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode: config.mode,
                ack_policy: config.ack_policy,
                max_concurrent_events: config.max_concurrent_events.max(1),
                workflow_concurrency: config.workflow_concurrency.max(1),
                dispatcher: EventDispatcher::new(),
                queue: config
                    .queue
                    .unwrap_or_else(|| Arc::new(InMemoryEventQueue::new())),
                runner: WorkflowRunner::new(),
                registry: Mutex::new(WorkflowRegistry::default()),
                scheduler: config.scheduler,
                conversation_store: config.conversation_store,
                conversation_lock: config.conversation_lock,
                conversation_lock_ttl: config.conversation_lock_ttl,
                conversation_lock_refresh: config.conversation_lock_refresh,
                conversation_lock_retry_count: config.conversation_lock_retry_count,
                conversation_lock_retry_delay: config.conversation_lock_retry_delay,
                conversation_lock_key_prefix: config.conversation_lock_key_prefix,
                run_store: config.run_store,
                on_workflow_error: config.on_workflow_error,
                on_run_store_error: config.on_run_store_error,
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                completion: Notify::new(),
                loop_lock: tokio::sync::Mutex::new(()),
                chains: ConversationChains::new(),
                metrics: Metrics::default(),
            }),
        }
    }

    /// The owned event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Registers an event subscriber.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: SubscriberHandler,
        options: SubscribeOptions,
    ) -> Subscriber {
        self.inner.dispatcher.subscribe(pattern, handler, options)
    }

    /// Removes an event subscriber.
    pub fn unsubscribe(&self, subscriber_id: switchyard_core::SubscriberId) -> bool {
        self.inner.dispatcher.unsubscribe(subscriber_id)
    }

    /// Publishes an event onto the queue.
    ///
    /// In worker-capable modes a running orchestrator starts (or continues)
    /// a queue pass.
    pub async fn publish(&self, event: Event) -> Result<(), OrchestratorError> {
        self.publish_message(QueueMessage::new(event)).await
    }

    /// Publishes a full queue envelope, callbacks included.
    pub async fn publish_message(&self, message: QueueMessage) -> Result<(), OrchestratorError> {
        self.inner.queue.enqueue(message).await?;
        self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);
        if self.inner.running.load(Ordering::SeqCst) && self.inner.mode != Mode::Producer {
            Inner::kick(&self.inner);
        }
        Ok(())
    }

    /// Registers a workflow with its trigger and run defaults.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateWorkflow`] for an already
    /// registered id.
    pub fn register_workflow(
        &self,
        workflow: Workflow,
        trigger: Trigger,
        defaults: RunDefaults,
    ) -> Result<WorkflowId, OrchestratorError> {
        let mut registry = self.inner.registry.lock().expect("registry lock poisoned");
        registry.insert(WorkflowRegistration {
            workflow,
            trigger,
            defaults,
        })
    }

    /// Unregisters a workflow. Returns whether it was registered.
    pub fn unregister_workflow(&self, workflow_id: WorkflowId) -> bool {
        let mut registry = self.inner.registry.lock().expect("registry lock poisoned");
        registry.remove(workflow_id)
    }

    /// Lists registered workflows.
    #[must_use]
    pub fn registered_workflows(&self) -> Vec<RegisteredWorkflow> {
        let registry = self.inner.registry.lock().expect("registry lock poisoned");
        registry.summaries()
    }

    /// Registers a raw cron job on the configured scheduler.
    ///
    /// # Errors
    ///
    /// Fails without a scheduler, or for an invalid expression or name.
    pub fn register_cron_job(
        &self,
        expression: &str,
        name: &str,
        handler: switchyard_scheduler::JobHandler,
    ) -> Result<JobId, OrchestratorError> {
        let scheduler = self.require_scheduler()?;
        Ok(scheduler.add_job(expression, name, handler)?)
    }

    /// Registers a cron job that publishes an event on each firing.
    ///
    /// # Errors
    ///
    /// Fails without a scheduler, for an invalid expression or name, or for
    /// an empty event type.
    pub fn register_cron_event(
        &self,
        expression: &str,
        event_type: &str,
        name: &str,
        payload: Option<JsonValue>,
        metadata: Option<EventMetadata>,
    ) -> Result<JobId, OrchestratorError> {
        let scheduler = self.require_scheduler()?;
        // Validate the type now rather than on every firing.
        Event::new(event_type, JsonValue::Null)?;

        let weak = Arc::downgrade(&self.inner);
        let event_type = event_type.to_string();
        let payload = payload.unwrap_or(JsonValue::Null);
        let handler: switchyard_scheduler::JobHandler = Arc::new(move || {
            let weak = Weak::clone(&weak);
            let event_type = event_type.clone();
            let payload = payload.clone();
            let metadata = metadata.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                let mut event = Event::new(event_type, payload)?;
                if let Some(metadata) = metadata {
                    event = event.with_metadata(metadata);
                }
                Inner::publish(&inner, event).await?;
                Ok(())
            })
        });

        Ok(scheduler.add_job(expression, name, handler)?)
    }

    /// Registers a cron job that runs a workflow on each firing.
    ///
    /// # Errors
    ///
    /// Fails without a scheduler, for an unknown workflow, or for a
    /// chatflow (cron firings carry no conversation id).
    pub fn register_cron_workflow(
        &self,
        expression: &str,
        workflow_id: WorkflowId,
        name: &str,
        overrides: Option<RunOverrides>,
    ) -> Result<JobId, OrchestratorError> {
        let scheduler = self.require_scheduler()?;
        let registration = {
            let registry = self.inner.registry.lock().expect("registry lock poisoned");
            registry
                .get(workflow_id)
                .ok_or(OrchestratorError::WorkflowNotFound { workflow_id })?
        };
        if registration.workflow.kind == WorkflowKind::Chatflow {
            return Err(OrchestratorError::ChatflowRequiresConversationId { workflow_id });
        }

        let weak = Arc::downgrade(&self.inner);
        let overrides = overrides.unwrap_or_default();
        let handler: switchyard_scheduler::JobHandler = Arc::new(move || {
            let weak = Weak::clone(&weak);
            let overrides = overrides.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                Inner::run_workflow(&inner, workflow_id, overrides)
                    .await
                    .map_err(|error| Box::new(error) as BoxError)?;
                Ok(())
            })
        });

        Ok(scheduler.add_job(expression, name, handler)?)
    }

    /// Runs a registered workflow directly, bypassing the queue but
    /// honoring chatflow serialization, memory, and run persistence.
    ///
    /// # Errors
    ///
    /// Fails for an unknown workflow, run-setup errors, conversation lock
    /// exhaustion, or an unhandled run-store failure.
    pub async fn run_workflow(
        &self,
        workflow_id: WorkflowId,
        overrides: RunOverrides,
    ) -> Result<WorkflowRunResult, OrchestratorError> {
        Inner::run_workflow(&self.inner, workflow_id, overrides).await
    }

    /// Starts the orchestrator: scheduler (outside worker mode) and, in
    /// worker-capable modes, a queue pass.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(mode = %self.inner.mode, "orchestrator starting");
        if self.inner.mode != Mode::Worker
            && let Some(scheduler) = &self.inner.scheduler
        {
            scheduler.start().await;
        }
        if self.inner.mode != Mode::Producer {
            Inner::kick(&self.inner);
        }
    }

    /// Stops the orchestrator, waiting for in-flight events to finish.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        loop {
            let notified = self.inner.completion.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        if self.inner.mode != Mode::Worker
            && let Some(scheduler) = &self.inner.scheduler
        {
            scheduler.stop().await;
        }
        tracing::debug!("orchestrator stopped");
    }

    /// Processes the queue to empty, even when stopped.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DrainUnavailable`] in producer mode.
    pub async fn drain(&self) -> Result<(), OrchestratorError> {
        if self.inner.mode == Mode::Producer {
            return Err(OrchestratorError::DrainUnavailable {
                mode: self.inner.mode,
            });
        }
        Inner::process_queue(Arc::clone(&self.inner), true).await;
        Ok(())
    }

    /// Takes a state snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            is_running: self.inner.running.load(Ordering::SeqCst),
            mode: self.inner.mode,
            queue_size: self.inner.queue.size().await,
            metrics: self.inner.metrics.snapshot(),
            timestamp: Utc::now(),
        }
    }

    fn require_scheduler(&self) -> Result<&Arc<dyn CronScheduler>, OrchestratorError> {
        self.inner
            .scheduler
            .as_ref()
            .ok_or(OrchestratorError::SchedulerUnavailable)
    }
}

impl Inner {
    /// Launches a queue pass unless one is already active.
    fn kick(inner: &Arc<Self>) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Self::process_queue(inner, false).await;
        });
    }

    /// The queue loop: dequeue while below the in-flight bound, launch
    /// each message as an independent task, and return once the queue is
    /// empty and nothing is in flight.
    async fn process_queue(inner: Arc<Self>, allow_when_stopped: bool) {
        let _pass = inner.loop_lock.lock().await;
        loop {
            if !allow_when_stopped && !inner.running.load(Ordering::SeqCst) {
                break;
            }

            // Arm the waiter before checking counts so a completion between
            // the check and the await is not lost.
            let notified = inner.completion.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut backend_failed = false;
            while inner.in_flight.load(Ordering::SeqCst) < inner.max_concurrent_events {
                match inner.queue.dequeue().await {
                    Ok(Some(message)) => {
                        inner.in_flight.fetch_add(1, Ordering::SeqCst);
                        let task_inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            Self::process_message(task_inner, message).await;
                        });
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::error!(%error, "queue dequeue failed");
                        backend_failed = true;
                        break;
                    }
                }
            }

            if inner.in_flight.load(Ordering::SeqCst) == 0 {
                if backend_failed || inner.queue.size().await == 0 {
                    break;
                }
                continue;
            }
            notified.await;
        }
    }

    /// Processes one message and applies the ack policy.
    async fn process_message(inner: Arc<Self>, message: QueueMessage) {
        let outcome = Self::process_event(&inner, &message.event).await;

        match inner.ack_policy {
            AckPolicy::Always => message.acknowledge().await,
            AckPolicy::OnSuccess => {
                if outcome.is_clean() {
                    message.acknowledge().await;
                } else {
                    message
                        .reject(format!(
                            "dispatch={}, workflows={}",
                            outcome.dispatch_errors, outcome.workflow_failures
                        ))
                        .await;
                }
            }
        }

        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        inner.completion.notify_waiters();
    }

    /// Dispatches to subscribers and runs triggered workflows in parallel.
    async fn process_event(inner: &Arc<Self>, event: &Event) -> EventOutcome {
        let (dispatch, triggered) = tokio::join!(
            inner.dispatcher.dispatch(event.clone()),
            Self::run_triggered_workflows(inner, event)
        );

        let outcome = EventOutcome {
            dispatch_errors: dispatch.errors.len(),
            workflow_failures: triggered.failures,
        };

        inner.metrics.processed.fetch_add(1, Ordering::Relaxed);
        inner
            .metrics
            .dispatch_errors
            .fetch_add(outcome.dispatch_errors as u64, Ordering::Relaxed);
        inner
            .metrics
            .workflow_runs
            .fetch_add(triggered.runs as u64, Ordering::Relaxed);
        inner
            .metrics
            .workflow_errors
            .fetch_add(triggered.failures as u64, Ordering::Relaxed);

        outcome
    }

    /// Runs every workflow triggered by the event, bounded by
    /// `workflow_concurrency`.
    async fn run_triggered_workflows(inner: &Arc<Self>, event: &Event) -> TriggeredOutcome {
        let matched = {
            let registry = inner.registry.lock().expect("registry lock poisoned");
            registry.triggered_by(event)
        };
        if matched.is_empty() {
            return TriggeredOutcome::default();
        }

        let semaphore = Arc::new(Semaphore::new(inner.workflow_concurrency));
        let runs = matched.len();
        let outcomes = join_all(matched.into_iter().map(|registration| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                Self::run_triggered(inner, registration, event).await
            }
        }))
        .await;

        TriggeredOutcome {
            runs,
            failures: outcomes.iter().filter(|ok| !**ok).count(),
        }
    }

    /// Runs one triggered workflow; returns whether the run was clean.
    async fn run_triggered(
        inner: &Arc<Self>,
        registration: Arc<WorkflowRegistration>,
        event: &Event,
    ) -> bool {
        let Trigger::Event(trigger) = &registration.trigger else {
            return true;
        };

        let overrides = RunOverrides {
            input: Some(
                trigger
                    .map_input
                    .as_ref()
                    .map_or_else(|| event.payload.clone(), |map| map(event)),
            ),
            context: trigger.map_context.as_ref().map(|map| map(event)),
            conversation_id: trigger
                .map_conversation_id
                .as_ref()
                .and_then(|map| map(event)),
            ..RunOverrides::default()
        };

        match Self::execute_registration(inner, &registration, overrides).await {
            Ok(result) => result.is_success(),
            Err(error) => {
                tracing::warn!(
                    workflow = %registration.workflow.id,
                    %error,
                    "triggered workflow failed"
                );
                if let Some(handler) = &inner.on_workflow_error {
                    let context = WorkflowErrorContext {
                        workflow_id: registration.workflow.id,
                        event: Some(event.clone()),
                        trigger: Some(registration.trigger.clone()),
                    };
                    if let Err(callback_error) = handler(&error, &context) {
                        tracing::debug!(
                            workflow = %registration.workflow.id,
                            %callback_error,
                            "on_workflow_error callback failed"
                        );
                    }
                }
                false
            }
        }
    }

    /// Direct workflow execution shared by `run_workflow` and cron wiring.
    async fn run_workflow(
        inner: &Arc<Self>,
        workflow_id: WorkflowId,
        overrides: RunOverrides,
    ) -> Result<WorkflowRunResult, OrchestratorError> {
        let registration = {
            let registry = inner.registry.lock().expect("registry lock poisoned");
            registry
                .get(workflow_id)
                .ok_or(OrchestratorError::WorkflowNotFound { workflow_id })?
        };
        Self::execute_registration(inner, &registration, overrides).await
    }

    /// Executes a registration: chatflow locking and memory around the
    /// runner, then run persistence.
    async fn execute_registration(
        inner: &Arc<Self>,
        registration: &Arc<WorkflowRegistration>,
        overrides: RunOverrides,
    ) -> Result<WorkflowRunResult, OrchestratorError> {
        let mut options = registration.defaults.merged(overrides);

        if registration.workflow.kind != WorkflowKind::Chatflow {
            let result = inner
                .runner
                .run(&registration.workflow, options)
                .await?;
            Self::persist_run(inner, &result).await?;
            return Ok(result);
        }

        let conversation_id = options
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(OrchestratorError::Workflow(
                switchyard_workflow::WorkflowError::MissingConversationId,
            ))?;

        // Local FIFO serialization, then the optional distributed lease.
        let _chain = inner.chains.acquire(&conversation_id).await;
        let lease = match &inner.conversation_lock {
            Some(lock) => Some(
                ConversationLease::acquire(
                    Arc::clone(lock),
                    format!("{}{}", inner.conversation_lock_key_prefix, conversation_id),
                    inner.conversation_lock_ttl,
                    inner.conversation_lock_refresh,
                    inner.conversation_lock_retry_count,
                    inner.conversation_lock_retry_delay,
                )
                .await?,
            ),
            None => None,
        };

        let outcome = async {
            if let Some(store) = &inner.conversation_store {
                let stored = store.get(&conversation_id).await?;
                if let Some(stored) = stored {
                    // Stored memory is the base; option memory wins per key.
                    let mut merged = stored;
                    for (key, value) in options.memory.take().unwrap_or_default() {
                        merged.insert(key, value);
                    }
                    options.memory = Some(merged);
                }
            }

            let result = inner
                .runner
                .run(&registration.workflow, options)
                .await?;

            if let Some(store) = &inner.conversation_store
                && let Some(memory) = &result.memory
            {
                store.set(&conversation_id, memory.clone()).await?;
            }

            Self::persist_run(inner, &result).await?;
            Ok(result)
        }
        .await;

        if let Some(lease) = lease {
            lease.release().await;
        }
        outcome
    }

    async fn persist_run(
        inner: &Arc<Self>,
        result: &WorkflowRunResult,
    ) -> Result<(), OrchestratorError> {
        let Some(store) = &inner.run_store else {
            return Ok(());
        };
        let record = to_run_record(result);
        if let Err(error) = store.save(&record).await {
            match &inner.on_run_store_error {
                Some(handler) => {
                    if let Err(callback_error) = handler(&error) {
                        tracing::debug!(%callback_error, "on_run_store_error callback failed");
                    }
                }
                None => return Err(OrchestratorError::RunStore(error)),
            }
        }
        Ok(())
    }

    /// Publish path shared with cron-event handlers.
    async fn publish(inner: &Arc<Self>, event: Event) -> Result<(), OrchestratorError> {
        inner.queue.enqueue(QueueMessage::new(event)).await?;
        inner.metrics.published.fetch_add(1, Ordering::Relaxed);
        if inner.running.load(Ordering::SeqCst) && inner.mode != Mode::Producer {
            Self::kick(inner);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TriggeredOutcome {
    runs: usize,
    failures: usize,
}
