//! Workflow node types.
//!
//! A node is a handler function plus its upstream dependencies and an
//! optional retry policy. Nodes are owned by a [`crate::Workflow`] and
//! referenced by id from dependency sets and run results.

use crate::retry::RetryPolicy;
use crate::runner::NodeContext;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use switchyard_core::BoxError;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// Async handler executed for a node.
///
/// Receives the run-scoped [`NodeContext`] and produces the node's result
/// value, which downstream nodes can read through `get_result`.
pub type NodeHandler =
    Arc<dyn Fn(NodeContext) -> BoxFuture<'static, Result<JsonValue, BoxError>> + Send + Sync>;

/// A workflow node.
#[derive(Clone)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// Upstream node ids that must complete before this node starts.
    pub depends_on: Vec<NodeId>,
    /// Retry policy; a node without one is attempted once.
    pub retry: Option<RetryPolicy>,
    handler: NodeHandler,
}

impl Node {
    /// Creates a new node with the given handler.
    #[must_use]
    pub fn new(name: impl Into<String>, handler: NodeHandler) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            depends_on: Vec::new(),
            retry: None,
            handler,
        }
    }

    /// Creates a node with a specific ID.
    #[must_use]
    pub fn with_id(id: NodeId, name: impl Into<String>, handler: NodeHandler) -> Self {
        Self {
            id,
            name: name.into(),
            depends_on: Vec::new(),
            retry: None,
            handler,
        }
    }

    /// Adds upstream dependencies. Duplicates are ignored.
    #[must_use]
    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = NodeId>) -> Self {
        for dependency in dependencies {
            if !self.depends_on.contains(&dependency) {
                self.depends_on.push(dependency);
            }
        }
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns a handle to this node's handler.
    #[must_use]
    pub fn handler(&self) -> NodeHandler {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("retry", &self.retry)
            .finish()
    }
}
