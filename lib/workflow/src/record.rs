//! Mapping run results to persistable records.
//!
//! Records are the storage shape consumed by [`crate::RunStore`] backends:
//! ids and statuses as strings, dates as ISO-8601 strings, errors as the
//! nested [`ErrorInfo`] shape.

use crate::result::{TimelineEntry, WorkflowRunResult};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use switchyard_core::ErrorInfo;
use switchyard_conversation::ConversationMemory;

/// A persistable run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run id, in prefixed string form.
    pub run_id: String,
    /// The workflow id, in prefixed string form.
    pub workflow_id: String,
    /// Terminal status: `"succeeded"` or `"failed"`.
    pub status: String,
    /// ISO-8601 start timestamp.
    pub started_at: String,
    /// ISO-8601 finish timestamp.
    pub finished_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Per-node result values, keyed by node id string.
    pub results: HashMap<String, JsonValue>,
    /// Per-node terminal errors, keyed by node id string.
    pub errors: HashMap<String, ErrorInfo>,
    /// Per-node attempt counts, keyed by node id string.
    pub attempts: HashMap<String, u32>,
    /// Ordered timeline of the run.
    pub timeline: Vec<TimelineEntry>,
    /// Conversation this run belonged to, for chatflows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Final memory snapshot, when the run carried memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<ConversationMemory>,
}

/// Converts a run result into its persistable record.
#[must_use]
pub fn to_run_record(result: &WorkflowRunResult) -> RunRecord {
    RunRecord {
        run_id: result.run_id.to_string(),
        workflow_id: result.workflow_id.to_string(),
        status: result.status.to_string(),
        started_at: result
            .started_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        finished_at: result
            .finished_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        duration_ms: result.duration_ms,
        results: result
            .results
            .iter()
            .map(|(id, value)| (id.to_string(), value.clone()))
            .collect(),
        errors: result
            .errors
            .iter()
            .map(|(id, error)| (id.to_string(), error.clone()))
            .collect(),
        attempts: result
            .attempts
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect(),
        timeline: result.timeline.clone(),
        conversation_id: result.conversation_id.clone(),
        memory: result.memory.clone(),
    }
}
