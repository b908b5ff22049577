//! Orchestrator configuration.

use crate::error::OrchestratorError;
use crate::trigger::Trigger;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use switchyard_conversation::ConversationStore;
use switchyard_core::{BoxError, WorkflowId};
use switchyard_event::{Event, EventQueue};
use switchyard_scheduler::{CronScheduler, DistributedLock};
use switchyard_workflow::{RunStore, RunStoreError};

/// Which responsibilities this instance takes on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Producer, worker, and scheduler in one process.
    #[default]
    All,
    /// Publishes events and runs cron jobs; never drains the queue.
    Producer,
    /// Drains the queue; never starts the scheduler.
    Worker,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Producer => write!(f, "producer"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// When to acknowledge a queue message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Every processed message is acked, whatever the outcome.
    #[default]
    Always,
    /// Ack only clean outcomes; otherwise nack with a reason.
    OnSuccess,
}

/// Context handed to [`OrchestratorConfig::on_workflow_error`].
#[derive(Clone)]
pub struct WorkflowErrorContext {
    /// The workflow whose invocation failed.
    pub workflow_id: WorkflowId,
    /// The event that triggered the invocation, if any.
    pub event: Option<Event>,
    /// The trigger that matched, if any.
    pub trigger: Option<Trigger>,
}

impl fmt::Debug for WorkflowErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowErrorContext")
            .field("workflow_id", &self.workflow_id)
            .field("event", &self.event.as_ref().map(|e| &e.event_type))
            .field("trigger", &self.trigger.is_some())
            .finish()
    }
}

/// Callback receiving trigger-invoked workflow failures.
///
/// Callback failures are logged and swallowed; they never affect event
/// processing.
pub type WorkflowErrorHandler = Arc<
    dyn Fn(&OrchestratorError, &WorkflowErrorContext) -> Result<(), BoxError> + Send + Sync,
>;

/// Callback receiving run-store save failures.
///
/// Callback failures are logged and swallowed; the run itself still
/// completes.
pub type RunStoreErrorHandler =
    Arc<dyn Fn(&RunStoreError) -> Result<(), BoxError> + Send + Sync>;

/// Orchestrator construction options.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Parallel `process_event` tasks in the queue loop.
    pub max_concurrent_events: usize,
    /// Parallel triggered-workflow runs per event.
    pub workflow_concurrency: usize,
    /// Producer/worker/scheduler responsibilities.
    pub mode: Mode,
    /// Message acknowledgement policy.
    pub ack_policy: AckPolicy,
    /// Queue backend; defaults to the in-memory FIFO.
    pub queue: Option<Arc<dyn EventQueue>>,
    /// Cron scheduler; without one, cron registration fails.
    pub scheduler: Option<Arc<dyn CronScheduler>>,
    /// Per-conversation memory storage.
    pub conversation_store: Option<Arc<dyn ConversationStore>>,
    /// Distributed lock serializing chatflow runs across processes.
    pub conversation_lock: Option<Arc<dyn DistributedLock>>,
    /// Lease TTL for the conversation lock.
    pub conversation_lock_ttl: Duration,
    /// Refresh cadence while a conversation lock is held. Zero disables.
    pub conversation_lock_refresh: Duration,
    /// Total acquire attempts before giving up.
    pub conversation_lock_retry_count: u32,
    /// Spacing between acquire attempts.
    pub conversation_lock_retry_delay: Duration,
    /// Key prefix for conversation locks.
    pub conversation_lock_key_prefix: String,
    /// Run-record persistence.
    pub run_store: Option<Arc<dyn RunStore>>,
    /// Receives trigger-invoked workflow failures.
    pub on_workflow_error: Option<WorkflowErrorHandler>,
    /// Receives run-store save failures; without it they propagate.
    pub on_run_store_error: Option<RunStoreErrorHandler>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_events: 1,
            workflow_concurrency: 4,
            mode: Mode::default(),
            ack_policy: AckPolicy::default(),
            queue: None,
            scheduler: None,
            conversation_store: None,
            conversation_lock: None,
            conversation_lock_ttl: Duration::from_secs(30),
            conversation_lock_refresh: Duration::from_secs(10),
            conversation_lock_retry_count: 5,
            conversation_lock_retry_delay: Duration::from_millis(100),
            conversation_lock_key_prefix: "orch:conv:".to_string(),
            run_store: None,
            on_workflow_error: None,
            on_run_store_error: None,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("max_concurrent_events", &self.max_concurrent_events)
            .field("workflow_concurrency", &self.workflow_concurrency)
            .field("mode", &self.mode)
            .field("ack_policy", &self.ack_policy)
            .field("queue", &self.queue.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .field("conversation_store", &self.conversation_store.is_some())
            .field("conversation_lock", &self.conversation_lock.is_some())
            .field("run_store", &self.run_store.is_some())
            .finish()
    }
}
