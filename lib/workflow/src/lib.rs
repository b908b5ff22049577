//! Workflow engine for the switchyard orchestration suite.
//!
//! This crate provides the workflow model and its execution engine:
//!
//! - **Model**: Workflows own a table of nodes with `depends_on` edges;
//!   validation and Kahn's topological sort happen at plan time
//! - **Retry**: Per-node retry policies with exponential backoff, a delay
//!   cap, and uniform jitter
//! - **Runner**: Dependency-aware parallel execution with bounded
//!   concurrency, fail-fast cancellation, lifecycle hooks, and per-run
//!   conversation memory
//! - **Records**: Run results with an ordered timeline, their persistable
//!   record mapping, and the [`RunStore`] interface with in-memory and
//!   file-backed implementations

pub mod definition;
pub mod error;
pub mod node;
pub mod record;
pub mod result;
pub mod retry;
pub mod run_store;
pub mod runner;

pub use definition::{Workflow, WorkflowKind};
pub use error::{RunStoreError, WorkflowError};
pub use node::{Node, NodeHandler, NodeId};
pub use record::{RunRecord, to_run_record};
pub use result::{RunStatus, TimelineEntry, TimelineEvent, WorkflowRunResult};
pub use retry::RetryPolicy;
pub use run_store::{FileRunStore, InMemoryRunStore, RunQuery, RunStore};
pub use runner::{NodeContext, RunOptions, RunnerHooks, WorkflowRunner};
