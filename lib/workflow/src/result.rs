//! Run results and the execution timeline.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use switchyard_core::{ErrorInfo, RunId, WorkflowId};
use switchyard_conversation::ConversationMemory;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every node completed.
    Succeeded,
    /// At least one node failed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A single timeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// The run began.
    RunStart,
    /// A node attempt began.
    NodeStart { node_id: NodeId, attempt: u32 },
    /// A node completed successfully.
    NodeComplete { node_id: NodeId },
    /// A node attempt failed and a retry is scheduled.
    NodeRetry {
        node_id: NodeId,
        attempt: u32,
        next_delay_ms: u64,
        error: ErrorInfo,
    },
    /// A node failed terminally.
    NodeError { node_id: NodeId, error: ErrorInfo },
    /// The run finished.
    RunComplete { status: RunStatus, duration_ms: u64 },
}

/// A timestamped timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub event: TimelineEvent,
}

/// The outcome of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    /// Unique identifier for this run.
    pub run_id: RunId,
    /// The workflow that was executed.
    pub workflow_id: WorkflowId,
    /// Terminal status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Per-node result values for nodes that completed.
    pub results: HashMap<NodeId, JsonValue>,
    /// Per-node terminal errors for nodes that failed.
    pub errors: HashMap<NodeId, ErrorInfo>,
    /// Per-node attempt counts for nodes whose handler ran.
    pub attempts: HashMap<NodeId, u32>,
    /// Ordered record of everything that happened during the run.
    pub timeline: Vec<TimelineEntry>,
    /// Conversation this run belonged to, for chatflows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Final memory snapshot, when the run carried memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<ConversationMemory>,
}

impl WorkflowRunResult {
    /// Returns whether the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Returns the result value of a node, if it completed.
    #[must_use]
    pub fn node_result(&self, node_id: NodeId) -> Option<&JsonValue> {
        self.results.get(&node_id)
    }

    /// Returns the terminal error of a node, if it failed.
    #[must_use]
    pub fn node_error(&self, node_id: NodeId) -> Option<&ErrorInfo> {
        self.errors.get(&node_id)
    }

    /// Counts timeline entries matching a predicate.
    #[must_use]
    pub fn count_timeline(&self, predicate: impl Fn(&TimelineEvent) -> bool) -> usize {
        self.timeline
            .iter()
            .filter(|entry| predicate(&entry.event))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_event_serde_tagging() {
        let entry = TimelineEntry {
            at: Utc::now(),
            event: TimelineEvent::NodeRetry {
                node_id: NodeId::new(),
                attempt: 2,
                next_delay_ms: 150,
                error: ErrorInfo::new("transient"),
            },
        };

        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["event"], "node_retry");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["next_delay_ms"], 150);

        let parsed: TimelineEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(entry, parsed);
    }

    #[test]
    fn run_status_display() {
        assert_eq!(RunStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }
}
