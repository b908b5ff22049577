//! Workflow definition and execution planning.
//!
//! A workflow owns its nodes and validates lazily: dangling dependencies and
//! cycles are detected when the execution plan is computed, not when nodes
//! are added.

use crate::error::WorkflowError;
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use switchyard_core::WorkflowId;

/// The kind of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// A plain workflow; runs are independent of each other.
    Workflow,
    /// A conversational workflow; runs are keyed by a conversation id and
    /// carry persistent memory.
    Chatflow,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Chatflow => write!(f, "chatflow"),
        }
    }
}

/// A workflow: a named DAG of nodes.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Whether runs are plain or conversational.
    pub kind: WorkflowKind,
    /// Nodes in insertion order.
    nodes: Vec<Node>,
    /// Map from node id to position in `nodes` for O(1) lookup.
    node_index: HashMap<NodeId, usize>,
}

impl Workflow {
    /// Creates a new plain workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, WorkflowKind::Workflow)
    }

    /// Creates a new chatflow.
    #[must_use]
    pub fn chatflow(name: impl Into<String>) -> Self {
        Self::with_kind(name, WorkflowKind::Chatflow)
    }

    /// Creates a workflow of the given kind.
    #[must_use]
    pub fn with_kind(name: impl Into<String>, kind: WorkflowKind) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            kind,
            nodes: Vec::new(),
            node_index: HashMap::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a node to the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::DuplicateNode`] if a node with the same id
    /// already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, WorkflowError> {
        let node_id = node.id;
        if self.node_index.contains_key(&node_id) {
            return Err(WorkflowError::DuplicateNode { node_id });
        }
        self.node_index.insert(node_id, self.nodes.len());
        self.nodes.push(node);
        Ok(node_id)
    }

    /// Records `from` as a dependency of `to`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NodeNotFound`] if either id is not part of
    /// the workflow.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), WorkflowError> {
        if !self.node_index.contains_key(&from) {
            return Err(WorkflowError::NodeNotFound { node_id: from });
        }
        let Some(&index) = self.node_index.get(&to) else {
            return Err(WorkflowError::NodeNotFound { node_id: to });
        };
        let node = &mut self.nodes[index];
        if !node.depends_on.contains(&from) {
            node.depends_on.push(from);
        }
        Ok(())
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.node_index.get(&node_id).map(|&index| &self.nodes[index])
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of nodes in the workflow.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Computes the execution plan via Kahn's topological sort.
    ///
    /// The plan lists every node so that each appears after all of its
    /// dependencies. Ties break by insertion order, so the ordering is
    /// stable across calls.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingDependency`] for a dependency on an
    /// absent node and [`WorkflowError::CycleDetected`] when the graph is
    /// cyclic.
    pub fn execution_plan(&self) -> Result<Vec<NodeId>, WorkflowError> {
        let mut deps: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node in &self.nodes {
            for dependency in &node.depends_on {
                if !self.node_index.contains_key(dependency) {
                    return Err(WorkflowError::MissingDependency {
                        node_id: node.id,
                        dependency: *dependency,
                    });
                }
                dependents.entry(*dependency).or_default().push(node.id);
            }
            deps.insert(node.id, node.depends_on.iter().copied().collect());
        }

        let mut ready: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.depends_on.is_empty())
            .map(|node| node.id)
            .collect();

        let mut plan = Vec::with_capacity(self.nodes.len());
        while let Some(node_id) = ready.pop_front() {
            plan.push(node_id);
            let Some(downstream) = dependents.get(&node_id) else {
                continue;
            };
            for dependent in downstream {
                if let Some(remaining) = deps.get_mut(dependent)
                    && remaining.remove(&node_id)
                    && remaining.is_empty()
                {
                    ready.push_back(*dependent);
                }
            }
        }

        if plan.len() != self.nodes.len() {
            return Err(WorkflowError::CycleDetected);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeHandler;
    use std::sync::Arc;

    fn noop_handler() -> NodeHandler {
        Arc::new(|_context| Box::pin(async { Ok(serde_json::Value::Null) }))
    }

    fn node(name: &str) -> Node {
        Node::new(name, noop_handler())
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut workflow = Workflow::new("test");
        let first = node("a");
        let duplicate = Node::with_id(first.id, "copy", noop_handler());

        workflow.add_node(first).unwrap();
        let err = workflow.add_node(duplicate).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateNode { .. }));
    }

    #[test]
    fn connect_requires_both_nodes() {
        let mut workflow = Workflow::new("test");
        let a = workflow.add_node(node("a")).unwrap();
        let missing = NodeId::new();

        assert!(matches!(
            workflow.connect(a, missing),
            Err(WorkflowError::NodeNotFound { node_id }) if node_id == missing
        ));
        assert!(matches!(
            workflow.connect(missing, a),
            Err(WorkflowError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn connect_records_dependency_once() {
        let mut workflow = Workflow::new("test");
        let a = workflow.add_node(node("a")).unwrap();
        let b = workflow.add_node(node("b")).unwrap();

        workflow.connect(a, b).unwrap();
        workflow.connect(a, b).unwrap();

        assert_eq!(workflow.node(b).unwrap().depends_on, vec![a]);
    }

    #[test]
    fn plan_orders_dependencies_first() {
        let mut workflow = Workflow::new("diamond");
        let a = workflow.add_node(node("a")).unwrap();
        let b = workflow.add_node(node("b").depends_on([a])).unwrap();
        let c = workflow.add_node(node("c").depends_on([a])).unwrap();
        let d = workflow.add_node(node("d").depends_on([b, c])).unwrap();

        let plan = workflow.execution_plan().unwrap();
        assert_eq!(plan.len(), 4);

        let position = |id: NodeId| plan.iter().position(|n| *n == id).unwrap();
        assert!(position(a) < position(b));
        assert!(position(a) < position(c));
        assert!(position(b) < position(d));
        assert!(position(c) < position(d));
    }

    #[test]
    fn plan_tie_break_is_insertion_order() {
        let mut workflow = Workflow::new("waves");
        let first = workflow.add_node(node("first")).unwrap();
        let second = workflow.add_node(node("second")).unwrap();
        let third = workflow.add_node(node("third")).unwrap();

        let plan = workflow.execution_plan().unwrap();
        assert_eq!(plan, vec![first, second, third]);
    }

    #[test]
    fn plan_detects_missing_dependency() {
        let mut workflow = Workflow::new("dangling");
        let ghost = NodeId::new();
        workflow.add_node(node("a").depends_on([ghost])).unwrap();

        let err = workflow.execution_plan().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::MissingDependency { dependency, .. } if dependency == ghost
        ));
    }

    #[test]
    fn plan_detects_cycle() {
        let mut workflow = Workflow::new("cyclic");
        let a = workflow.add_node(node("a")).unwrap();
        let b = workflow.add_node(node("b")).unwrap();
        workflow.connect(a, b).unwrap();
        workflow.connect(b, a).unwrap();

        assert_eq!(
            workflow.execution_plan().unwrap_err(),
            WorkflowError::CycleDetected
        );
    }

    #[test]
    fn chatflow_kind() {
        let workflow = Workflow::chatflow("support").with_description("support bot");
        assert_eq!(workflow.kind, WorkflowKind::Chatflow);
        assert_eq!(workflow.description.as_deref(), Some("support bot"));
    }
}
