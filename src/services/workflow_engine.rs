//! Workflow graph engine.
//!
//! Drives a [`WorkflowGraph`] to a terminal state: picks the lowest level
//! that still has work, dispatches its ready nodes according to the
//! execution strategy, gates results through the quality framework and
//! records outcomes. Replanners add or remove nodes through a
//! [`MutationHandle`] while nodes are in flight.

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{GraphError, GraphResult};
use crate::domain::models::{
    ExecutionStrategy, FailureKind, FailurePolicy, FailureReport, QualityPolicy, QualityResult,
    RunReport, RunState, Severity, TaskDecomposition, TaskId, TaskNode, TaskState, WorkflowConfig,
    WorkflowGraph,
};
use crate::domain::ports::{DispatchContext, TaskDispatcher};
use crate::services::quality_framework::QualityFramework;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub failure_policy: FailurePolicy,
    /// Used when the decomposition does not name a strategy.
    pub strategy: ExecutionStrategy,
    pub max_parallel: usize,
    /// Upper bound on one dispatch, protocol retries included.
    pub task_timeout: Duration,
    pub quality_policy: QualityPolicy,
    pub quality_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

impl From<&WorkflowConfig> for EngineSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            failure_policy: config.failure_policy,
            strategy: config.strategy,
            max_parallel: config.max_parallel.max(1),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            quality_policy: config.quality_policy,
            quality_retries: config.quality_retries,
        }
    }
}

/// Progress notifications streamed while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        total_tasks: usize,
        level_count: usize,
    },
    LevelStarted {
        level: usize,
        tasks: Vec<TaskId>,
    },
    TaskStarted {
        id: TaskId,
        agent: String,
    },
    TaskCompleted {
        id: TaskId,
        quality_score: Option<f64>,
    },
    TaskFailed {
        id: TaskId,
        kind: FailureKind,
        cause: String,
    },
    TaskSkipped {
        id: TaskId,
    },
    NodeAdded {
        id: TaskId,
        level: usize,
    },
    NodeRemoved {
        id: TaskId,
    },
    LevelCompleted {
        level: usize,
        completed: usize,
        failed: usize,
    },
    RunCompleted {
        run_id: Uuid,
        state: RunState,
    },
}

/// Runtime change to a live graph.
#[derive(Debug, Clone)]
pub enum GraphMutation {
    AddNode(TaskNode),
    RemoveNode(TaskId),
}

struct MutationRequest {
    mutation: GraphMutation,
    reply: oneshot::Sender<GraphResult<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Rejected(#[from] GraphError),

    #[error("Run has already finished")]
    RunFinished,
}

/// Sends mutations to the run that issued it.
#[derive(Debug, Clone)]
pub struct MutationHandle {
    tx: mpsc::Sender<MutationRequest>,
}

impl std::fmt::Debug for MutationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationRequest")
            .field("mutation", &self.mutation)
            .finish_non_exhaustive()
    }
}

impl MutationHandle {
    /// Apply `mutation` and wait for the run to accept or reject it.
    ///
    /// A rejected mutation leaves the graph unchanged.
    pub async fn apply(&self, mutation: GraphMutation) -> Result<(), MutationError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MutationRequest { mutation, reply })
            .await
            .map_err(|_| MutationError::RunFinished)?;
        rx.await.map_err(|_| MutationError::RunFinished)?.map_err(Into::into)
    }

    pub async fn add_node(&self, node: TaskNode) -> Result<(), MutationError> {
        self.apply(GraphMutation::AddNode(node)).await
    }

    pub async fn remove_node(&self, id: impl Into<TaskId>) -> Result<(), MutationError> {
        self.apply(GraphMutation::RemoveNode(id.into())).await
    }
}

/// A validated graph waiting to be executed.
pub struct WorkflowRun {
    run_id: Uuid,
    graph: WorkflowGraph,
    strategy: Option<ExecutionStrategy>,
    context: DispatchContext,
    mutation_tx: Option<mpsc::Sender<MutationRequest>>,
    mutation_rx: mpsc::Receiver<MutationRequest>,
}

impl WorkflowRun {
    /// Validate `decomposition` into a graph.
    pub fn new(decomposition: TaskDecomposition) -> GraphResult<Self> {
        let graph = WorkflowGraph::from_decomposition(decomposition.tasks)?;
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(32);
        Ok(Self {
            run_id,
            graph,
            strategy: decomposition.strategy,
            context: DispatchContext {
                session_id: Uuid::new_v4().to_string(),
                correlation_id: run_id.to_string(),
                trace_id: Uuid::new_v4().to_string(),
            },
            mutation_tx: Some(tx),
            mutation_rx: rx,
        })
    }

    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub const fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub const fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Carry the caller's session and trace identifiers into every dispatch.
    #[must_use]
    pub fn with_context(mut self, context: DispatchContext) -> Self {
        self.context = context;
        self
    }

    /// Handle for replanners. Stops accepting mutations when the run ends.
    pub fn mutation_handle(&self) -> Option<MutationHandle> {
        self.mutation_tx
            .as_ref()
            .map(|tx| MutationHandle { tx: tx.clone() })
    }
}

enum Verdict {
    Completed(Value),
    Failed(FailureReport),
}

struct NodeRun {
    id: TaskId,
    verdict: Verdict,
    quality: Option<QualityResult>,
    retries: u32,
}

/// Executes workflow runs against a [`TaskDispatcher`].
pub struct WorkflowEngine {
    dispatcher: Arc<dyn TaskDispatcher>,
    quality: Arc<QualityFramework>,
    settings: EngineSettings,
    events: Option<mpsc::Sender<ExecutionEvent>>,
}

impl WorkflowEngine {
    pub fn new(
        dispatcher: Arc<dyn TaskDispatcher>,
        quality: Arc<QualityFramework>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            dispatcher,
            quality,
            settings,
            events: None,
        }
    }

    /// Stream [`ExecutionEvent`]s to `tx`.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate and execute a decomposition in one step.
    pub async fn run(&self, decomposition: TaskDecomposition) -> GraphResult<RunReport> {
        let run = WorkflowRun::new(decomposition)?;
        Ok(self.execute(run).await)
    }

    /// Drive `run` until every node is terminal.
    #[instrument(skip_all, fields(run_id = %run.run_id, session_id = %run.context.session_id))]
    pub async fn execute(&self, mut run: WorkflowRun) -> RunReport {
        let started_at = Utc::now();
        let strategy = run.strategy.unwrap_or(self.settings.strategy);
        let policy = self.settings.failure_policy;
        // Only handles given out so far keep the channel open.
        run.mutation_tx = None;

        info!(
            tasks = run.graph.len(),
            ?strategy,
            ?policy,
            "workflow run started"
        );
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id,
            total_tasks: run.graph.len(),
            level_count: run.graph.levels().len(),
        })
        .await;

        let mut mutations_open = true;
        let mut any_failed = false;

        loop {
            while mutations_open {
                match run.mutation_rx.try_recv() {
                    Ok(request) => self.apply_mutation(&mut run.graph, request).await,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => mutations_open = false,
                }
            }

            if any_failed && policy == FailurePolicy::FailFast {
                for id in run.graph.skip_unexecuted() {
                    self.emit(ExecutionEvent::TaskSkipped { id }).await;
                }
            }

            let Some((level, ready)) = run.graph.next_runnable() else {
                break;
            };
            if ready.is_empty() {
                // Nothing dispatchable at the lowest open level.
                for (id, state) in run.graph.settle() {
                    if state == TaskState::Skipped {
                        self.emit(ExecutionEvent::TaskSkipped { id }).await;
                    }
                }
                if run.graph.next_runnable().is_some_and(|(_, r)| r.is_empty()) {
                    error!(level, "no runnable node at open level, skipping remainder");
                    for id in run.graph.skip_unexecuted() {
                        self.emit(ExecutionEvent::TaskSkipped { id }).await;
                    }
                }
                continue;
            }

            debug!(level, tasks = ready.len(), "level started");
            self.emit(ExecutionEvent::LevelStarted {
                level,
                tasks: ready.clone(),
            })
            .await;

            let (mut completed, mut failed) = (0, 0);
            for batch in strategy.batches(ready, self.settings.max_parallel) {
                if any_failed && policy == FailurePolicy::FailFast {
                    break;
                }

                let mut nodes = Vec::with_capacity(batch.len());
                for id in &batch {
                    if let Err(err) = run.graph.mark_running(id) {
                        warn!(node_id = %id, error = %err, "node left the ready state");
                        continue;
                    }
                    if let Some(node) = run.graph.get(id) {
                        self.emit(ExecutionEvent::TaskStarted {
                            id: id.clone(),
                            agent: node.agent.clone(),
                        })
                        .await;
                        nodes.push(node.clone());
                    }
                }

                let dispatches = join_all(
                    nodes
                        .iter()
                        .map(|node| self.execute_node(node, &run.context)),
                );
                tokio::pin!(dispatches);

                let results = loop {
                    tokio::select! {
                        results = &mut dispatches => break results,
                        request = run.mutation_rx.recv(), if mutations_open => match request {
                            Some(request) => self.apply_mutation(&mut run.graph, request).await,
                            None => mutations_open = false,
                        },
                    }
                };

                for node_run in results {
                    if self.record(&mut run.graph, node_run, policy).await {
                        completed += 1;
                    } else {
                        failed += 1;
                        any_failed = true;
                    }
                }
            }

            self.emit(ExecutionEvent::LevelCompleted {
                level,
                completed,
                failed,
            })
            .await;
        }

        let state = run.graph.run_state(policy);
        let report = RunReport {
            run_id: run.run_id,
            session_id: run.context.session_id.clone(),
            state,
            outcomes: run.graph.outcomes(),
            failed: run.graph.ids_in(TaskState::Failed),
            skipped: run.graph.ids_in(TaskState::Skipped),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            state = state.as_str(),
            completed = report.completed_count(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms(),
            "workflow run finished"
        );
        self.emit(ExecutionEvent::RunCompleted {
            run_id: run.run_id,
            state,
        })
        .await;
        report
    }

    /// Dispatch one node, applying the timeout and the quality gate.
    #[instrument(skip_all, fields(node_id = %node.id, agent = %node.agent))]
    async fn execute_node(&self, node: &TaskNode, ctx: &DispatchContext) -> NodeRun {
        let domain = node
            .quality_domain
            .clone()
            .or_else(|| self.dispatcher.quality_domain(node));
        let mut task = node.clone();
        let mut quality_attempts = 0;

        loop {
            let dispatched =
                timeout(self.settings.task_timeout, self.dispatcher.dispatch(&task, ctx)).await;
            let value = match dispatched {
                Err(_) => {
                    warn!(timeout = ?self.settings.task_timeout, "node timed out");
                    return NodeRun {
                        id: node.id.clone(),
                        verdict: Verdict::Failed(FailureReport::new(
                            FailureKind::Timeout,
                            format!("no result within {:?}", self.settings.task_timeout),
                        )),
                        quality: None,
                        retries: quality_attempts,
                    };
                }
                Ok(Err(err)) => {
                    let retries = quality_attempts + err.attempts.saturating_sub(1);
                    warn!(kind = %err.kind, cause = %err.cause, "dispatch failed");
                    return NodeRun {
                        id: node.id.clone(),
                        verdict: Verdict::Failed(err.into()),
                        quality: None,
                        retries,
                    };
                }
                Ok(Ok(value)) => value,
            };

            let Some(domain) = domain.as_deref() else {
                return NodeRun {
                    id: node.id.clone(),
                    verdict: Verdict::Completed(value),
                    quality: None,
                    retries: quality_attempts,
                };
            };

            let quality = self.quality.validate(domain, &value);
            if quality.passed {
                return NodeRun {
                    id: node.id.clone(),
                    verdict: Verdict::Completed(value),
                    quality: Some(quality),
                    retries: quality_attempts,
                };
            }

            let verdict = match self.settings.quality_policy {
                QualityPolicy::PassThrough => {
                    warn!(
                        domain,
                        score = quality.score,
                        "quality gate failed, passing result through"
                    );
                    Verdict::Completed(value)
                }
                QualityPolicy::RetryWithFeedback
                    if quality_attempts < self.settings.quality_retries =>
                {
                    quality_attempts += 1;
                    info!(
                        domain,
                        score = quality.score,
                        attempt = quality_attempts,
                        "quality gate failed, retrying with feedback"
                    );
                    task.description = with_feedback(&node.description, &quality);
                    continue;
                }
                QualityPolicy::Reject | QualityPolicy::RetryWithFeedback => {
                    Verdict::Failed(quality_failure(domain, &quality))
                }
            };
            return NodeRun {
                id: node.id.clone(),
                verdict,
                quality: Some(quality),
                retries: quality_attempts,
            };
        }
    }

    /// Apply one node's outcome to the graph. Returns whether it completed.
    async fn record(
        &self,
        graph: &mut WorkflowGraph,
        run: NodeRun,
        policy: FailurePolicy,
    ) -> bool {
        let NodeRun {
            id,
            verdict,
            quality,
            retries,
        } = run;
        let quality_score = quality.as_ref().map(|q| q.score);
        if let Some(node) = graph.node_mut(&id) {
            node.retry_count = retries;
            node.quality = quality;
        }

        match verdict {
            Verdict::Completed(value) => {
                match graph.complete(&id, value) {
                    Ok(promoted) => debug!(node_id = %id, ?promoted, "node completed"),
                    Err(err) => error!(node_id = %id, error = %err, "could not record completion"),
                }
                self.emit(ExecutionEvent::TaskCompleted { id, quality_score })
                    .await;
                true
            }
            Verdict::Failed(report) => {
                let (kind, cause) = (report.kind, report.cause.clone());
                if let Err(err) = graph.fail(&id, report) {
                    error!(node_id = %id, error = %err, "could not record failure");
                }
                self.emit(ExecutionEvent::TaskFailed {
                    id: id.clone(),
                    kind,
                    cause,
                })
                .await;
                if policy == FailurePolicy::BestEffort {
                    for skipped in graph.skip_descendants(&id) {
                        self.emit(ExecutionEvent::TaskSkipped { id: skipped }).await;
                    }
                }
                false
            }
        }
    }

    async fn apply_mutation(&self, graph: &mut WorkflowGraph, request: MutationRequest) {
        let MutationRequest { mutation, reply } = request;
        let outcome = match mutation {
            GraphMutation::AddNode(node) => {
                let id = node.id.clone();
                graph.add_node(node).map(|()| id)
            }
            GraphMutation::RemoveNode(id) => graph.remove_node(&id).map(|_| id),
        };

        let reply_value = match outcome {
            Ok(id) => {
                match graph.level_of(&id) {
                    Some(level) => {
                        info!(node_id = %id, level, "node added");
                        self.emit(ExecutionEvent::NodeAdded {
                            id: id.clone(),
                            level,
                        })
                        .await;
                        if graph.get(&id).is_some_and(|n| n.state == TaskState::Skipped) {
                            self.emit(ExecutionEvent::TaskSkipped { id }).await;
                        }
                    }
                    None => {
                        info!(node_id = %id, "node removed");
                        self.emit(ExecutionEvent::NodeRemoved { id }).await;
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "graph mutation rejected");
                Err(err)
            }
        };
        // The requester may have given up waiting.
        let _ = reply.send(reply_value);
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

fn with_feedback(description: &str, quality: &QualityResult) -> String {
    format!(
        "{description}\n\nThe previous result did not meet the quality requirements \
         (score {:.2}). Address these issues:\n{}",
        quality.score,
        quality.summary(Severity::Warning)
    )
}

fn quality_failure(domain: &str, quality: &QualityResult) -> FailureReport {
    FailureReport::new(
        FailureKind::QualityFailure,
        format!(
            "{domain} quality score {:.3} rejected: {}",
            quality.score,
            quality.summary(Severity::Error).replace('\n', "; ")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::DispatchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Scripted dispatcher: per-agent results, records dispatch order.
    #[derive(Default)]
    struct ScriptedDispatcher {
        results: BTreeMap<String, Result<Value, DispatchError>>,
        domains: BTreeMap<String, String>,
        delay: Option<Duration>,
        calls: Mutex<Vec<(TaskId, String)>>,
    }

    impl ScriptedDispatcher {
        fn ok(mut self, agent: &str, value: Value) -> Self {
            self.results.insert(agent.into(), Ok(value));
            self
        }

        fn failing(mut self, agent: &str) -> Self {
            self.results.insert(
                agent.into(),
                Err(DispatchError {
                    kind: FailureKind::TaskExecution,
                    cause: "remote error".into(),
                    attempts: 3,
                }),
            );
            self
        }

        fn gated(mut self, agent: &str, domain: &str) -> Self {
            self.domains.insert(agent.into(), domain.into());
            self
        }

        fn order(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| id.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl TaskDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            task: &TaskNode,
            _ctx: &DispatchContext,
        ) -> Result<Value, DispatchError> {
            self.calls
                .lock()
                .unwrap()
                .push((task.id.clone(), task.description.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.results
                .get(&task.agent)
                .cloned()
                .unwrap_or_else(|| Ok(json!({"agent": task.agent})))
        }

        fn quality_domain(&self, task: &TaskNode) -> Option<String> {
            self.domains.get(&task.agent).cloned()
        }
    }

    fn engine(
        dispatcher: ScriptedDispatcher,
        settings: EngineSettings,
    ) -> (WorkflowEngine, Arc<ScriptedDispatcher>) {
        let dispatcher = Arc::new(dispatcher);
        let engine = WorkflowEngine::new(
            Arc::clone(&dispatcher) as Arc<dyn TaskDispatcher>,
            Arc::new(QualityFramework::default()),
            settings,
        );
        (engine, dispatcher)
    }

    fn fan_out() -> TaskDecomposition {
        TaskDecomposition::new(vec![
            TaskNode::new("a", "planner", "plan"),
            TaskNode::new("b", "broken", "left").with_dependency("a"),
            TaskNode::new("c", "worker", "right").with_dependency("a"),
        ])
    }

    #[tokio::test]
    async fn test_all_nodes_complete() {
        let (engine, dispatcher) = engine(ScriptedDispatcher::default(), EngineSettings::default());
        let report = engine.run(fan_out()).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.completed_count(), 3);
        assert_eq!(dispatcher.order()[0], "a");
        assert!((report.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_sibling_not_yet_dispatched() {
        let settings = EngineSettings {
            strategy: ExecutionStrategy::Sequential,
            ..EngineSettings::default()
        };
        let (engine, dispatcher) =
            engine(ScriptedDispatcher::default().failing("broken"), settings);
        let report = engine.run(fan_out()).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failed, vec![TaskId::from("b")]);
        assert_eq!(report.skipped, vec![TaskId::from("c")]);
        assert_eq!(dispatcher.order(), vec!["a", "b"]);

        let b = report.outcome(&"b".into()).unwrap();
        let failure = b.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::TaskExecution);
        assert_eq!(failure.attempts, 3);
        assert_eq!(b.retry_count, 2);
    }

    #[tokio::test]
    async fn test_best_effort_keeps_independent_branch() {
        let settings = EngineSettings {
            failure_policy: FailurePolicy::BestEffort,
            ..EngineSettings::default()
        };
        let decomposition = TaskDecomposition::new(vec![
            TaskNode::new("a", "broken", "root"),
            TaskNode::new("b", "worker", "child").with_dependency("a"),
            TaskNode::new("x", "worker", "independent"),
        ]);
        let (engine, _) = engine(ScriptedDispatcher::default().failing("broken"), settings);
        let report = engine.run(decomposition).await.unwrap();

        assert_eq!(report.state, RunState::PartialSuccess);
        assert_eq!(report.skipped, vec![TaskId::from("b")]);
        assert_eq!(
            report.outcome(&"x".into()).unwrap().state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_quality_reject_fails_node() {
        let dispatcher = ScriptedDispatcher::default()
            .ok("analyst", json!({"confidence_score": 0.5, "risk_tolerance": 0.9}))
            .gated("analyst", "BUSINESS");
        let (engine, _) = engine(dispatcher, EngineSettings::default());
        let report = engine
            .run(TaskDecomposition::new(vec![TaskNode::new("q", "analyst", "assess")]))
            .await
            .unwrap();

        let outcome = report.outcome(&"q".into()).unwrap();
        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::QualityFailure);
        assert!(!outcome.quality.as_ref().unwrap().passed);
    }

    #[tokio::test]
    async fn test_quality_retry_with_feedback() {
        let dispatcher = ScriptedDispatcher::default()
            .ok("analyst", json!({"confidence_score": 0.5, "risk_tolerance": 0.7}))
            .gated("analyst", "BUSINESS");
        let settings = EngineSettings {
            quality_policy: QualityPolicy::RetryWithFeedback,
            quality_retries: 2,
            ..EngineSettings::default()
        };
        let (engine, dispatcher) = engine(dispatcher, settings);
        let report = engine
            .run(TaskDecomposition::new(vec![TaskNode::new("q", "analyst", "assess")]))
            .await
            .unwrap();

        let calls = dispatcher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, "assess");
        assert!(calls[1].1.contains("confidence_score"));
        assert_eq!(report.outcome(&"q".into()).unwrap().retry_count, 2);
        assert_eq!(report.state, RunState::Failed);
    }

    #[tokio::test]
    async fn test_quality_pass_through_keeps_issues() {
        let dispatcher = ScriptedDispatcher::default()
            .ok("analyst", json!({"confidence_score": 0.6, "risk_tolerance": 0.7}))
            .gated("analyst", "BUSINESS");
        let settings = EngineSettings {
            quality_policy: QualityPolicy::PassThrough,
            ..EngineSettings::default()
        };
        let (engine, _) = engine(dispatcher, settings);
        let report = engine
            .run(TaskDecomposition::new(vec![TaskNode::new("q", "analyst", "assess")]))
            .await
            .unwrap();

        let outcome = report.outcome(&"q".into()).unwrap();
        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(outcome.quality.as_ref().unwrap().count(Severity::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout() {
        let dispatcher = ScriptedDispatcher {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedDispatcher::default()
        };
        let settings = EngineSettings {
            task_timeout: Duration::from_secs(5),
            ..EngineSettings::default()
        };
        let (engine, _) = engine(dispatcher, settings);
        let report = engine
            .run(TaskDecomposition::new(vec![TaskNode::new("slow", "worker", "wait")]))
            .await
            .unwrap();

        let failure = report.outcome(&"slow".into()).unwrap().failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_invalid_decomposition_is_rejected() {
        let (engine, _) = engine(ScriptedDispatcher::default(), EngineSettings::default());
        let err = engine
            .run(TaskDecomposition::new(vec![
                TaskNode::new("a", "w", "").with_dependency("ghost"),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingDependency { .. }));
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let (tx, mut rx) = mpsc::channel(64);
        let (engine, _) = engine(ScriptedDispatcher::default(), EngineSettings::default());
        let engine = engine.with_events(tx);
        engine.run(fan_out()).await.unwrap();
        drop(engine);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::RunStarted {
                total_tasks: 3,
                level_count: 2,
                ..
            })
        ));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::RunCompleted {
                state: RunState::Completed,
                ..
            })
        ));
        let levels: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::LevelStarted { level, tasks } => Some((*level, tasks.len())),
                _ => None,
            })
            .collect();
        assert_eq!(levels, vec![(0, 1), (1, 2)]);
    }

    #[tokio::test]
    async fn test_mutation_after_run_is_refused() {
        let (engine, _) = engine(ScriptedDispatcher::default(), EngineSettings::default());
        let run = WorkflowRun::new(fan_out()).unwrap();
        let handle = run.mutation_handle().unwrap();
        engine.execute(run).await;

        assert_eq!(
            handle.add_node(TaskNode::new("late", "w", "")).await,
            Err(MutationError::RunFinished)
        );
    }
}
