//! Event-driven workflow orchestration for switchyard.
//!
//! The orchestrator multiplexes a single event queue into subscriber
//! dispatch and triggered workflow runs, wires cron jobs back into both,
//! and serializes chatflow runs per conversation:
//!
//! - **Modes**: producer (publish + cron), worker (queue loop), or all
//! - **Registration**: workflows indexed by exact type, wildcard, and
//!   pattern matchers for event-to-workflow fan-out
//! - **Concurrency**: independent bounds on parallel events and parallel
//!   triggered workflows per event
//! - **Acking**: always, or only on clean outcomes with a nack reason
//! - **Conversations**: local FIFO chains plus an optional distributed
//!   lease, with memory loaded before and saved after each run

pub mod config;
mod conversation;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod trigger;

pub use config::{
    AckPolicy, Mode, OrchestratorConfig, RunStoreErrorHandler, WorkflowErrorContext,
    WorkflowErrorHandler,
};
pub use error::OrchestratorError;
pub use orchestrator::{MetricsSnapshot, Orchestrator, Snapshot};
pub use registry::{RegisteredWorkflow, RunDefaults, RunOverrides, WorkflowRegistration};
pub use trigger::{
    ConversationIdMapper, EventMapper, EventMatcher, EventTrigger, Trigger, TriggerFilter,
};
