//! Error types for the orchestrator.

use crate::config::Mode;
use std::fmt;
use switchyard_conversation::ConversationError;
use switchyard_core::WorkflowId;
use switchyard_event::{EventError, QueueError};
use switchyard_scheduler::SchedulerError;
use switchyard_workflow::{RunStoreError, WorkflowError};

/// Errors from orchestrator operations.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// A workflow with the same id is already registered.
    DuplicateWorkflow { workflow_id: WorkflowId },
    /// The referenced workflow is not registered.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// A cron operation was requested but no scheduler is configured.
    SchedulerUnavailable,
    /// `drain` was called in a mode that never consumes the queue.
    DrainUnavailable { mode: Mode },
    /// A chatflow was wired to a context that cannot supply a
    /// conversation id.
    ChatflowRequiresConversationId { workflow_id: WorkflowId },
    /// The distributed conversation lock stayed contended through every
    /// retry.
    ConversationLockUnavailable { key: String, attempts: u32 },
    /// A workflow model or run-setup error.
    Workflow(WorkflowError),
    /// A scheduler or cron-expression error.
    Scheduler(SchedulerError),
    /// A queue backend error.
    Queue(QueueError),
    /// An event construction error.
    Event(EventError),
    /// A conversation store error.
    Conversation(ConversationError),
    /// A run store error with no `on_run_store_error` handler installed.
    RunStore(RunStoreError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateWorkflow { workflow_id } => {
                write!(f, "workflow already registered: {workflow_id}")
            }
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::SchedulerUnavailable => {
                write!(f, "no scheduler configured")
            }
            Self::DrainUnavailable { mode } => {
                write!(f, "drain is not available in {mode} mode")
            }
            Self::ChatflowRequiresConversationId { workflow_id } => {
                write!(
                    f,
                    "chatflow {workflow_id} requires a conversation id and cannot be cron-scheduled"
                )
            }
            Self::ConversationLockUnavailable { key, attempts } => {
                write!(
                    f,
                    "conversation lock '{key}' unavailable after {attempts} attempts"
                )
            }
            Self::Workflow(e) => write!(f, "workflow error: {e}"),
            Self::Scheduler(e) => write!(f, "scheduler error: {e}"),
            Self::Queue(e) => write!(f, "queue error: {e}"),
            Self::Event(e) => write!(f, "event error: {e}"),
            Self::Conversation(e) => write!(f, "conversation error: {e}"),
            Self::RunStore(e) => write!(f, "run store error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Workflow(e) => Some(e),
            Self::Scheduler(e) => Some(e),
            Self::Queue(e) => Some(e),
            Self::Event(e) => Some(e),
            Self::Conversation(e) => Some(e),
            Self::RunStore(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WorkflowError> for OrchestratorError {
    fn from(e: WorkflowError) -> Self {
        Self::Workflow(e)
    }
}

impl From<SchedulerError> for OrchestratorError {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}

impl From<QueueError> for OrchestratorError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<EventError> for OrchestratorError {
    fn from(e: EventError) -> Self {
        Self::Event(e)
    }
}

impl From<ConversationError> for OrchestratorError {
    fn from(e: ConversationError) -> Self {
        Self::Conversation(e)
    }
}

impl From<RunStoreError> for OrchestratorError {
    fn from(e: RunStoreError) -> Self {
        Self::RunStore(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let workflow_id = WorkflowId::new();
        let err = OrchestratorError::WorkflowNotFound { workflow_id };
        assert!(err.to_string().contains(&workflow_id.to_string()));

        let err = OrchestratorError::DrainUnavailable {
            mode: Mode::Producer,
        };
        assert!(err.to_string().contains("producer"));

        let err = OrchestratorError::ConversationLockUnavailable {
            key: "orch:conv:42".to_string(),
            attempts: 5,
        };
        assert!(err.to_string().contains("orch:conv:42"));
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn wrapped_errors_expose_source() {
        use std::error::Error;
        let err = OrchestratorError::Workflow(WorkflowError::CycleDetected);
        assert!(err.source().is_some());
    }
}
