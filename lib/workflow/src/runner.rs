//! Workflow execution.
//!
//! The runner executes a workflow's plan with dependency-aware parallelism:
//! nodes spawn as soon as their dependencies complete, bounded by a
//! semaphore. A single cancellation token per run implements fail-fast;
//! handlers observe it cooperatively. Node failures are collected into the
//! run result — the runner only fails for plan or argument errors.

use crate::definition::{Workflow, WorkflowKind};
use crate::error::WorkflowError;
use crate::node::{Node, NodeId};
use crate::result::{RunStatus, TimelineEntry, TimelineEvent, WorkflowRunResult};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use switchyard_core::{BoxError, ErrorInfo, RunId};
use switchyard_conversation::ConversationMemory;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default node parallelism for plain workflows.
pub const DEFAULT_WORKFLOW_CONCURRENCY: usize = 4;

/// Default node parallelism for chatflows.
pub const DEFAULT_CHATFLOW_CONCURRENCY: usize = 1;

/// Lifecycle hooks observed during a run.
///
/// Hook failures are logged and swallowed; they never affect the run.
#[derive(Clone, Default)]
pub struct RunnerHooks {
    /// Called before each node attempt, with the attempt number.
    pub on_node_start: Option<Arc<dyn Fn(&Node, u32) -> Result<(), BoxError> + Send + Sync>>,
    /// Called after a node completes, with its result value.
    pub on_node_complete:
        Option<Arc<dyn Fn(&Node, &JsonValue) -> Result<(), BoxError> + Send + Sync>>,
    /// Called before a retry sleep, with the error, the failed attempt
    /// number, and the upcoming delay in milliseconds.
    pub on_node_retry:
        Option<Arc<dyn Fn(&Node, &ErrorInfo, u32, u64) -> Result<(), BoxError> + Send + Sync>>,
    /// Called when a node fails terminally.
    pub on_node_error:
        Option<Arc<dyn Fn(&Node, &ErrorInfo) -> Result<(), BoxError> + Send + Sync>>,
}

impl fmt::Debug for RunnerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerHooks")
            .field("on_node_start", &self.on_node_start.is_some())
            .field("on_node_complete", &self.on_node_complete.is_some())
            .field("on_node_retry", &self.on_node_retry.is_some())
            .field("on_node_error", &self.on_node_error.is_some())
            .finish()
    }
}

/// Options for a single run.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Input value exposed to every node.
    pub input: JsonValue,
    /// Shared context value exposed to every node.
    pub context: JsonValue,
    /// Node parallelism; defaults to 4 for workflows and 1 for chatflows.
    pub concurrency: Option<usize>,
    /// Cancel the run on the first node failure. Defaults to true.
    pub fail_fast: Option<bool>,
    /// Conversation this run belongs to. Required for chatflows.
    pub conversation_id: Option<String>,
    /// Initial memory snapshot; deep-cloned so the caller's map is never
    /// mutated.
    pub memory: Option<ConversationMemory>,
    /// Lifecycle hooks.
    pub hooks: RunnerHooks,
}

/// Per-node execution context handed to handlers.
#[derive(Clone)]
pub struct NodeContext {
    /// The node being executed.
    pub node_id: NodeId,
    /// The current attempt number (1-based).
    pub attempt: u32,
    input: Arc<JsonValue>,
    context: Arc<JsonValue>,
    results: Arc<Mutex<HashMap<NodeId, JsonValue>>>,
    memory: Arc<Mutex<ConversationMemory>>,
    cancellation: CancellationToken,
}

impl NodeContext {
    /// The run input.
    #[must_use]
    pub fn input(&self) -> &JsonValue {
        &self.input
    }

    /// The shared run context.
    #[must_use]
    pub fn context(&self) -> &JsonValue {
        &self.context
    }

    /// Returns the result of an already-completed node.
    #[must_use]
    pub fn get_result(&self, node_id: NodeId) -> Option<JsonValue> {
        self.results
            .lock()
            .expect("results lock poisoned")
            .get(&node_id)
            .cloned()
    }

    /// Returns a snapshot of the run memory.
    #[must_use]
    pub fn get_memory(&self) -> ConversationMemory {
        self.memory.lock().expect("memory lock poisoned").clone()
    }

    /// Replaces the run memory wholesale.
    pub fn set_memory(&self, memory: ConversationMemory) {
        *self.memory.lock().expect("memory lock poisoned") = memory;
    }

    /// Merges the patch into the run memory, replacing existing keys.
    pub fn update_memory(&self, patch: ConversationMemory) {
        let mut memory = self.memory.lock().expect("memory lock poisoned");
        for (key, value) in patch {
            memory.insert(key, value);
        }
    }

    /// The run's cancellation token. Cancelled on the first node failure
    /// when fail-fast is enabled; handlers should observe it and return
    /// promptly.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Shared mutable state of a run, cloned into node tasks.
#[derive(Clone)]
struct RunState {
    input: Arc<JsonValue>,
    context: Arc<JsonValue>,
    results: Arc<Mutex<HashMap<NodeId, JsonValue>>>,
    memory: Arc<Mutex<ConversationMemory>>,
    timeline: Arc<Mutex<Vec<TimelineEntry>>>,
    cancellation: CancellationToken,
    semaphore: Arc<Semaphore>,
    hooks: RunnerHooks,
}

impl RunState {
    fn record(&self, event: TimelineEvent) {
        self.timeline
            .lock()
            .expect("timeline lock poisoned")
            .push(TimelineEntry {
                at: Utc::now(),
                event,
            });
    }
}

/// Executes workflows.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowRunner;

impl WorkflowRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs a workflow to completion.
    ///
    /// Node failures do not fail this method; they are collected into a
    /// result with status [`RunStatus::Failed`].
    ///
    /// # Errors
    ///
    /// Returns an error for plan construction failures (dangling
    /// dependencies, cycles), invalid retry policies, or a chatflow run
    /// without a conversation id.
    pub async fn run(
        &self,
        workflow: &Workflow,
        options: RunOptions,
    ) -> Result<WorkflowRunResult, WorkflowError> {
        let plan = workflow.execution_plan()?;

        for node in workflow.nodes() {
            if let Some(retry) = &node.retry {
                retry
                    .validate()
                    .map_err(|reason| WorkflowError::InvalidRetryPolicy {
                        node_id: node.id,
                        reason,
                    })?;
            }
        }

        let conversation_id = match workflow.kind {
            WorkflowKind::Chatflow => Some(
                options
                    .conversation_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(WorkflowError::MissingConversationId)?,
            ),
            WorkflowKind::Workflow => options.conversation_id.clone(),
        };

        let concurrency = options
            .concurrency
            .unwrap_or(match workflow.kind {
                WorkflowKind::Workflow => DEFAULT_WORKFLOW_CONCURRENCY,
                WorkflowKind::Chatflow => DEFAULT_CHATFLOW_CONCURRENCY,
            })
            .max(1);
        let fail_fast = options.fail_fast.unwrap_or(true);

        let state = RunState {
            input: Arc::new(options.input),
            context: Arc::new(options.context),
            results: Arc::new(Mutex::new(HashMap::new())),
            // Cloning the caller's map is a deep copy; handlers never see
            // the original.
            memory: Arc::new(Mutex::new(options.memory.unwrap_or_default())),
            timeline: Arc::new(Mutex::new(Vec::new())),
            cancellation: CancellationToken::new(),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            hooks: options.hooks,
        };

        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        state.record(TimelineEvent::RunStart);

        let nodes: HashMap<NodeId, Node> = workflow
            .nodes()
            .map(|node| (node.id, node.clone()))
            .collect();

        let mut deps: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node_id in &plan {
            if let Some(node) = nodes.get(node_id) {
                for dependency in &node.depends_on {
                    dependents.entry(*dependency).or_default().push(*node_id);
                }
                deps.insert(*node_id, node.depends_on.iter().copied().collect());
            }
        }

        let mut ready: VecDeque<NodeId> = plan
            .iter()
            .filter(|node_id| deps.get(*node_id).is_none_or(HashSet::is_empty))
            .copied()
            .collect();

        let mut errors: HashMap<NodeId, ErrorInfo> = HashMap::new();
        let mut attempts: HashMap<NodeId, u32> = HashMap::new();
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut remaining = plan.len();
        let mut tasks: JoinSet<(NodeId, u32, Result<JsonValue, ErrorInfo>)> = JoinSet::new();

        while remaining > 0 {
            while let Some(node_id) = ready.pop_front() {
                // Fail-fast: anything not yet started is skipped silently.
                if fail_fast && state.cancellation.is_cancelled() {
                    remaining -= 1;
                    release_dependents(node_id, &mut deps, &dependents, &mut ready);
                    continue;
                }

                let Some(node) = nodes.get(&node_id) else {
                    remaining -= 1;
                    continue;
                };

                // Without fail-fast, a node below a failed dependency fails
                // by dependency and its handler never runs.
                if let Some(culprit) = node.depends_on.iter().find(|dep| failed.contains(dep)) {
                    let error = ErrorInfo::named(
                        "DependencyFailed",
                        format!("dependency {culprit} failed"),
                    );
                    state.record(TimelineEvent::NodeError {
                        node_id,
                        error: error.clone(),
                    });
                    run_error_hook(&state.hooks, node, &error);
                    errors.insert(node_id, error);
                    failed.insert(node_id);
                    remaining -= 1;
                    release_dependents(node_id, &mut deps, &dependents, &mut ready);
                    continue;
                }

                tasks.spawn(execute_node(node.clone(), state.clone()));
            }

            if remaining == 0 {
                break;
            }

            match tasks.join_next().await {
                None => break,
                Some(Err(join_error)) => {
                    tracing::error!(error = %join_error, "node task aborted");
                    if fail_fast {
                        state.cancellation.cancel();
                    }
                    remaining -= 1;
                }
                Some(Ok((node_id, attempt_count, outcome))) => {
                    remaining -= 1;
                    attempts.insert(node_id, attempt_count);
                    match outcome {
                        Ok(value) => {
                            state
                                .results
                                .lock()
                                .expect("results lock poisoned")
                                .insert(node_id, value);
                            release_dependents(node_id, &mut deps, &dependents, &mut ready);
                        }
                        Err(error) => {
                            errors.insert(node_id, error);
                            failed.insert(node_id);
                            if fail_fast {
                                state.cancellation.cancel();
                            }
                            release_dependents(node_id, &mut deps, &dependents, &mut ready);
                        }
                    }
                }
            }
        }

        let status = if errors.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let duration_ms = clock.elapsed().as_millis() as u64;
        state.record(TimelineEvent::RunComplete {
            status,
            duration_ms,
        });

        let results = state
            .results
            .lock()
            .expect("results lock poisoned")
            .clone();
        let timeline = state
            .timeline
            .lock()
            .expect("timeline lock poisoned")
            .clone();
        let final_memory = state.memory.lock().expect("memory lock poisoned").clone();
        let memory = if conversation_id.is_some() || !final_memory.is_empty() {
            Some(final_memory)
        } else {
            None
        };

        Ok(WorkflowRunResult {
            run_id,
            workflow_id: workflow.id,
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            results,
            errors,
            attempts,
            timeline,
            conversation_id,
            memory,
        })
    }
}

/// Marks `node_id` done in the dependency bookkeeping and queues any
/// dependent whose last dependency this was.
fn release_dependents(
    node_id: NodeId,
    deps: &mut HashMap<NodeId, HashSet<NodeId>>,
    dependents: &HashMap<NodeId, Vec<NodeId>>,
    ready: &mut VecDeque<NodeId>,
) {
    let Some(downstream) = dependents.get(&node_id) else {
        return;
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

/// Runs one node to a terminal outcome, honoring its retry policy.
async fn execute_node(
    node: Node,
    state: RunState,
) -> (NodeId, u32, Result<JsonValue, ErrorInfo>) {
    // A closed semaphore is impossible here; fall through unbounded if it
    // ever were.
    let _permit = Arc::clone(&state.semaphore).acquire_owned().await.ok();

    let mut attempt = 0;

    loop {
        attempt += 1;
        state.record(TimelineEvent::NodeStart {
            node_id: node.id,
            attempt,
        });
        if let Some(hook) = &state.hooks.on_node_start {
            if let Err(error) = hook(&node, attempt) {
                tracing::debug!(node = %node.id, %error, "on_node_start hook failed");
            }
        }

        let context = NodeContext {
            node_id: node.id,
            attempt,
            input: Arc::clone(&state.input),
            context: Arc::clone(&state.context),
            results: Arc::clone(&state.results),
            memory: Arc::clone(&state.memory),
            cancellation: state.cancellation.clone(),
        };

        match (node.handler())(context).await {
            Ok(value) => {
                state.record(TimelineEvent::NodeComplete { node_id: node.id });
                if let Some(hook) = &state.hooks.on_node_complete {
                    if let Err(error) = hook(&node, &value) {
                        tracing::debug!(node = %node.id, %error, "on_node_complete hook failed");
                    }
                }
                return (node.id, attempt, Ok(value));
            }
            Err(error) => {
                let info = ErrorInfo::from(&error);

                if let Some(retry) = &node.retry
                    && attempt < retry.max_attempts
                {
                    let delay = retry.next_delay(attempt);
                    let next_delay_ms = delay.as_millis() as u64;
                    state.record(TimelineEvent::NodeRetry {
                        node_id: node.id,
                        attempt,
                        next_delay_ms,
                        error: info.clone(),
                    });
                    if let Some(hook) = &state.hooks.on_node_retry {
                        if let Err(error) = hook(&node, &info, attempt, next_delay_ms) {
                            tracing::debug!(node = %node.id, %error, "on_node_retry hook failed");
                        }
                    }

                    tokio::select! {
                        () = tokio::time::sleep(delay) => continue,
                        () = state.cancellation.cancelled() => {
                            // The run was cancelled mid-backoff; give up on
                            // further attempts.
                            state.record(TimelineEvent::NodeError {
                                node_id: node.id,
                                error: info.clone(),
                            });
                            run_error_hook(&state.hooks, &node, &info);
                            return (node.id, attempt, Err(info));
                        }
                    }
                }

                state.record(TimelineEvent::NodeError {
                    node_id: node.id,
                    error: info.clone(),
                });
                run_error_hook(&state.hooks, &node, &info);
                return (node.id, attempt, Err(info));
            }
        }
    }
}

fn run_error_hook(hooks: &RunnerHooks, node: &Node, info: &ErrorInfo) {
    if let Some(hook) = &hooks.on_node_error {
        if let Err(error) = hook(node, info) {
            tracing::debug!(node = %node.id, %error, "on_node_error hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeHandler;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
    use std::time::Duration;

    fn value_handler(value: JsonValue) -> NodeHandler {
        Arc::new(move |_context| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    fn failing_handler(message: &'static str) -> NodeHandler {
        Arc::new(move |_context| Box::pin(async move { Err::<JsonValue, BoxError>(message.into()) }))
    }

    #[tokio::test]
    async fn dag_ordering_respected() {
        // A; B dep A; C dep A — concurrency 2.
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let tracker = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| -> NodeHandler {
            Arc::new(move |_context| {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                    Ok(json!(label))
                })
            })
        };

        let mut workflow = Workflow::new("dag");
        let a = workflow
            .add_node(Node::new("a", tracker("a", Arc::clone(&order))))
            .unwrap();
        workflow
            .add_node(Node::new("b", tracker("b", Arc::clone(&order))).depends_on([a]))
            .unwrap();
        workflow
            .add_node(Node::new("c", tracker("c", Arc::clone(&order))).depends_on([a]))
            .unwrap();

        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    concurrency: Some(2),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        let order = order.lock().unwrap().clone();
        assert_eq!(order[0], "a");
        assert_eq!(order.len(), 3);
        assert_eq!(result.results.len(), 3);
    }

    #[tokio::test]
    async fn retry_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let handler: NodeHandler = Arc::new(move |_context| {
            let calls = Arc::clone(&calls_clone);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err::<JsonValue, BoxError>("transient".into())
                } else {
                    Ok(json!("finally"))
                }
            })
        });

        let mut workflow = Workflow::new("retrying");
        let node_id = workflow
            .add_node(Node::new("flaky", handler).with_retry(RetryPolicy::new(3)))
            .unwrap();

        let result = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.attempts.get(&node_id), Some(&3));
        let retries = result
            .count_timeline(|event| matches!(event, TimelineEvent::NodeRetry { .. }));
        assert_eq!(retries, 2);
        let node_errors = result
            .count_timeline(|event| matches!(event, TimelineEvent::NodeError { .. }));
        assert_eq!(node_errors, 0);
    }

    #[tokio::test]
    async fn fail_fast_cancels_siblings() {
        let observed_abort = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed_abort);
        let waiting: NodeHandler = Arc::new(move |context| {
            let observed = Arc::clone(&observed_clone);
            Box::pin(async move {
                context.cancellation().cancelled().await;
                observed.store(context.is_cancelled(), Ordering::SeqCst);
                Ok(json!("resolved on abort"))
            })
        });

        let mut workflow = Workflow::new("fail-fast");
        workflow
            .add_node(Node::new("failing", failing_handler("boom")))
            .unwrap();
        workflow.add_node(Node::new("waiting", waiting)).unwrap();

        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    concurrency: Some(2),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(observed_abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fail_fast_skips_unstarted_dependents() {
        let mut workflow = Workflow::new("chain");
        let a = workflow
            .add_node(Node::new("a", failing_handler("boom")))
            .unwrap();
        let b = workflow
            .add_node(Node::new("b", value_handler(json!(1))).depends_on([a]))
            .unwrap();

        let result = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.errors.contains_key(&a));
        // B never started: no attempt, no result, no error.
        assert!(!result.attempts.contains_key(&b));
        assert!(!result.results.contains_key(&b));
        assert!(!result.errors.contains_key(&b));
    }

    #[tokio::test]
    async fn no_fail_fast_marks_dependency_failures() {
        let independent_ran = Arc::new(AtomicBool::new(false));
        let independent_clone = Arc::clone(&independent_ran);
        let independent: NodeHandler = Arc::new(move |_context| {
            let ran = Arc::clone(&independent_clone);
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                Ok(json!("done"))
            })
        });

        let mut workflow = Workflow::new("independent");
        let a = workflow
            .add_node(Node::new("a", failing_handler("boom")))
            .unwrap();
        let b = workflow
            .add_node(Node::new("b", value_handler(json!(1))).depends_on([a]))
            .unwrap();
        workflow.add_node(Node::new("c", independent)).unwrap();

        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    fail_fast: Some(false),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert!(independent_ran.load(Ordering::SeqCst));
        // B failed by dependency without its handler running.
        let b_error = result.node_error(b).expect("dependency failure");
        assert_eq!(b_error.name, "DependencyFailed");
        assert!(!result.attempts.contains_key(&b));
    }

    #[tokio::test]
    async fn chatflow_requires_conversation_id() {
        let mut workflow = Workflow::chatflow("chat");
        workflow
            .add_node(Node::new("step", value_handler(json!(null))))
            .unwrap();

        let err = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::MissingConversationId);

        let err = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    conversation_id: Some("  ".to_string()),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::MissingConversationId);
    }

    #[tokio::test]
    async fn memory_threads_through_nodes() {
        let increment: NodeHandler = Arc::new(|context| {
            Box::pin(async move {
                let memory = context.get_memory();
                let count = memory.get("count").and_then(JsonValue::as_i64).unwrap_or(0);
                let mut patch = ConversationMemory::new();
                patch.insert("count".to_string(), json!(count + 1));
                context.update_memory(patch);
                Ok(json!(count + 1))
            })
        });

        let mut workflow = Workflow::chatflow("counter");
        let first = workflow
            .add_node(Node::new("first", Arc::clone(&increment)))
            .unwrap();
        workflow
            .add_node(Node::new("second", increment).depends_on([first]))
            .unwrap();

        let mut initial = ConversationMemory::new();
        initial.insert("count".to_string(), json!(10));

        let caller_copy = initial.clone();
        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    conversation_id: Some("conv-1".to_string()),
                    memory: Some(initial.clone()),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.conversation_id.as_deref(), Some("conv-1"));
        let memory = result.memory.expect("final memory");
        assert_eq!(memory.get("count"), Some(&json!(12)));
        // The caller's map was deep-cloned, not mutated.
        assert_eq!(initial, caller_copy);
    }

    #[tokio::test]
    async fn downstream_reads_upstream_results() {
        let mut workflow = Workflow::new("pipeline");
        let producer = workflow
            .add_node(Node::new("producer", value_handler(json!({"n": 21}))))
            .unwrap();

        let consumer: NodeHandler = Arc::new(move |context| {
            Box::pin(async move {
                let upstream = context.get_result(producer).expect("producer result");
                let n = upstream["n"].as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            })
        });
        let consumer_id = workflow
            .add_node(Node::new("consumer", consumer).depends_on([producer]))
            .unwrap();

        let result = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap();

        assert_eq!(result.node_result(consumer_id), Some(&json!(42)));
    }

    #[tokio::test]
    async fn hooks_observe_lifecycle_and_failures_are_swallowed() {
        let starts = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let starts_clone = Arc::clone(&starts);
        let completes_clone = Arc::clone(&completes);
        let retries_clone = Arc::clone(&retries);
        let errors_clone = Arc::clone(&errors);

        let hooks = RunnerHooks {
            on_node_start: Some(Arc::new(move |_node, _attempt| {
                starts_clone.fetch_add(1, Ordering::SeqCst);
                // A failing hook must not affect the run.
                Err("hook broke".into())
            })),
            on_node_complete: Some(Arc::new(move |_node, _value| {
                completes_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            on_node_retry: Some(Arc::new(move |_node, _error, _attempt, _delay| {
                retries_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            on_node_error: Some(Arc::new(move |_node, _error| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        };

        let mut workflow = Workflow::new("hooked");
        workflow
            .add_node(
                Node::new("always-fails", failing_handler("nope"))
                    .with_retry(RetryPolicy::new(2)),
            )
            .unwrap();

        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    hooks,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(completes.load(Ordering::SeqCst), 0);
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_bound_respected() {
        let in_flight = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));

        let make_handler = || -> NodeHandler {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            Arc::new(move |_context| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                Box::pin(async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(null))
                })
            })
        };

        let mut workflow = Workflow::new("bounded");
        for n in 0..6 {
            workflow
                .add_node(Node::new(format!("n{n}"), make_handler()))
                .unwrap();
        }

        let result = WorkflowRunner::new()
            .run(
                &workflow,
                RunOptions {
                    concurrency: Some(2),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn invalid_retry_policy_rejected() {
        let mut workflow = Workflow::new("bad-policy");
        let node_id = workflow
            .add_node(
                Node::new("zero", value_handler(json!(null))).with_retry(RetryPolicy::new(0)),
            )
            .unwrap();

        let err = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidRetryPolicy { node_id: id, .. } if id == node_id
        ));
    }

    #[tokio::test]
    async fn timeline_brackets_the_run() {
        let mut workflow = Workflow::new("timeline");
        workflow
            .add_node(Node::new("only", value_handler(json!(1))))
            .unwrap();

        let result = WorkflowRunner::new()
            .run(&workflow, RunOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            result.timeline.first().map(|entry| &entry.event),
            Some(TimelineEvent::RunStart)
        ));
        assert!(matches!(
            result.timeline.last().map(|entry| &entry.event),
            Some(TimelineEvent::RunComplete { status: RunStatus::Succeeded, .. })
        ));
    }
}
