//! Whole-stack runs: engine -> dispatcher -> client -> pool -> in-process agents.

mod common;

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use common::{client, endpoint, manual_pool, metrics_agent};
use meshwork::adapters::transport::InProcessTransport;
use meshwork::domain::models::{
    AgentProfile, AgentTier, ExecutionStrategy, FailureKind, FailurePolicy, ProtocolEnvelope,
    QualityPolicy, ResponseEnvelope, RunState, TaskDecomposition, TaskId, TaskNode, TaskState,
};
use meshwork::domain::ports::{DispatchContext, TransportError};
use meshwork::infrastructure::pool::ConnectionPool;
use meshwork::services::{
    AgentDirectory, EngineSettings, ExecutionEvent, MutationError, ProtocolDispatcher,
    QualityFramework, WorkflowEngine, WorkflowRun,
};

struct Mesh {
    transport: InProcessTransport,
    pool: Arc<ConnectionPool>,
    directory: Arc<AgentDirectory>,
}

impl Mesh {
    fn new() -> Self {
        let transport = InProcessTransport::new().with_multiplexing(true);
        let pool = manual_pool(&transport);
        Self {
            transport,
            pool,
            directory: Arc::new(AgentDirectory::new()),
        }
    }

    fn agent(
        &self,
        id: &str,
        port: u16,
        domain: Option<&str>,
        handler: impl meshwork::adapters::transport::AgentHandler + 'static,
    ) {
        let mut profile = AgentProfile::new(id, AgentTier::Specialist, endpoint(port));
        if let Some(domain) = domain {
            profile = profile.with_quality_domain(domain);
        }
        self.directory.register(profile);
        self.transport.register(endpoint(port), handler);
    }

    fn engine(&self, settings: EngineSettings) -> WorkflowEngine {
        let client = Arc::new(client(Arc::clone(&self.pool)));
        let dispatcher =
            ProtocolDispatcher::new(client, Arc::clone(&self.directory)).with_max_retries(2);
        WorkflowEngine::new(
            Arc::new(dispatcher),
            Arc::new(QualityFramework::default()),
            settings,
        )
    }
}

fn id(s: &str) -> TaskId {
    TaskId::new(s)
}

fn diamond() -> TaskDecomposition {
    TaskDecomposition::new(vec![
        TaskNode::new("research", "researcher", "Collect market data"),
        TaskNode::new("pricing", "analyst", "Model pricing").with_dependency("research"),
        TaskNode::new("risk", "analyst", "Assess risk").with_dependency("research"),
        TaskNode::new("report", "writer", "Write the summary")
            .with_dependencies(["pricing", "risk"]),
    ])
}

fn good_business() -> serde_json::Value {
    json!({"confidence_score": 0.92, "risk_tolerance": 0.6})
}

#[tokio::test]
async fn test_diamond_completes_and_shares_one_trace() {
    let mesh = Mesh::new();
    let traces: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
    for (agent, port) in [("researcher", 8401), ("writer", 8403)] {
        let traces = Arc::clone(&traces);
        mesh.agent(agent, port, None, move |req: ProtocolEnvelope| {
            traces.lock().unwrap().push((
                req.params.metadata.extra["task_id"].as_str().unwrap_or_default().to_string(),
                req.params.metadata.trace_id.clone(),
            ));
            async move { Ok::<_, TransportError>(ResponseEnvelope::agent_reply(req.id, "done")) }
        });
    }
    mesh.agent("analyst", 8402, Some("BUSINESS"), metrics_agent(good_business()));

    let run = WorkflowRun::new(diamond()).unwrap().with_context(DispatchContext {
        session_id: "sess-1".into(),
        correlation_id: "corr-1".into(),
        trace_id: "trace-1".into(),
    });
    let report = mesh.engine(EngineSettings::default()).execute(run).await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.completed_count(), 4);
    assert_eq!(report.session_id, "sess-1");
    assert!(report.outcome(&id("pricing")).unwrap().quality.as_ref().unwrap().passed);
    assert!(report.outcome(&id("research")).unwrap().quality.is_none());

    let traces = traces.lock().unwrap();
    let order: Vec<_> = traces.iter().map(|(task, _)| task.as_str()).collect();
    assert_eq!(order, vec!["research", "report"]);
    assert!(traces.iter().all(|(_, t)| t.as_deref() == Some("trace-1")));

    // One session per agent endpoint, reused across nodes.
    assert_eq!(mesh.transport.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_agent_fails_fast() {
    let mesh = Mesh::new();
    mesh.agent("researcher", 8411, None, common::echo_agent());
    mesh.agent("writer", 8413, None, common::echo_agent());
    // The analyst is registered in the directory but nothing listens.
    mesh.directory
        .register(AgentProfile::new("analyst", AgentTier::Specialist, endpoint(8412)));

    let report = mesh
        .engine(EngineSettings {
            strategy: ExecutionStrategy::Sequential,
            ..EngineSettings::default()
        })
        .run(diamond())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    let pricing = report.outcome(&id("pricing")).unwrap();
    assert_eq!(pricing.state, TaskState::Failed);
    let failure = pricing.failure.as_ref().unwrap();
    // Retries were spent; the cause names the endpoint that never answered.
    assert_eq!(failure.kind, FailureKind::TaskExecution);
    assert_eq!(failure.attempts, 2);
    assert!(failure.cause.contains("8412"), "{}", failure.cause);
    assert_eq!(report.skipped, vec![id("report"), id("risk")]);
}

#[tokio::test(start_paused = true)]
async fn test_best_effort_keeps_independent_branches() {
    let mesh = Mesh::new();
    mesh.agent("researcher", 8421, None, common::echo_agent());
    mesh.agent("analyst", 8422, Some("BUSINESS"), metrics_agent(good_business()));
    mesh.agent("writer", 8423, None, common::echo_agent());
    mesh.agent("auditor", 8424, None, |req: ProtocolEnvelope| async move {
        Err::<ResponseEnvelope, _>(TransportError::Reset(format!("{} dropped", req.id)))
    });

    let mut tasks = diamond().tasks;
    tasks.push(TaskNode::new("audit", "auditor", "Audit sources").with_dependency("research"));
    tasks.push(TaskNode::new("sign_off", "writer", "Sign off").with_dependency("audit"));

    let report = mesh
        .engine(EngineSettings {
            failure_policy: FailurePolicy::BestEffort,
            ..EngineSettings::default()
        })
        .run(TaskDecomposition::new(tasks))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::PartialSuccess);
    assert_eq!(report.failed, vec![id("audit")]);
    assert_eq!(report.skipped, vec![id("sign_off")]);
    assert_eq!(
        report.outcome(&id("report")).unwrap().state,
        TaskState::Completed
    );
}

#[tokio::test]
async fn test_quality_gate_rejects_weak_analysis() {
    let mesh = Mesh::new();
    mesh.agent(
        "analyst",
        8431,
        Some("BUSINESS"),
        metrics_agent(json!({"confidence_score": 0.3, "risk_tolerance": 0.5})),
    );

    let report = mesh
        .engine(EngineSettings::default())
        .run(TaskDecomposition::new(vec![TaskNode::new(
            "pricing", "analyst", "Model pricing",
        )]))
        .await
        .unwrap();

    let outcome = report.outcome(&id("pricing")).unwrap();
    assert_eq!(outcome.state, TaskState::Failed);
    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::QualityFailure);
    let quality = outcome.quality.as_ref().unwrap();
    assert!(!quality.passed);
    assert_eq!(quality.metadata["domain"], json!("BUSINESS"));
}

#[tokio::test]
async fn test_retry_with_feedback_reaches_agent() {
    let mesh = Mesh::new();
    let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
    let recorder = Arc::clone(&prompts);
    mesh.agent("analyst", 8441, Some("BUSINESS"), move |req: ProtocolEnvelope| {
        let text = req.params.message.joined_text();
        let attempt = {
            let mut prompts = recorder.lock().unwrap();
            prompts.push(text);
            prompts.len()
        };
        let confidence = if attempt == 1 { 0.4 } else { 0.9 };
        async move {
            Ok::<_, TransportError>(ResponseEnvelope::success(
                req.id,
                json!({"metrics": {"confidence_score": confidence, "risk_tolerance": 0.7}}),
            ))
        }
    });

    let report = mesh
        .engine(EngineSettings {
            quality_policy: QualityPolicy::RetryWithFeedback,
            quality_retries: 2,
            ..EngineSettings::default()
        })
        .run(TaskDecomposition::new(vec![TaskNode::new(
            "pricing", "analyst", "Model pricing",
        )]))
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.outcome(&id("pricing")).unwrap().retry_count, 1);
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].starts_with("Model pricing"));
    assert!(prompts[1].contains("confidence_score"));
}

#[tokio::test(start_paused = true)]
async fn test_node_added_while_level_in_flight() {
    let mesh = Mesh::new();
    mesh.agent("researcher", 8451, None, |req: ProtocolEnvelope| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<_, TransportError>(ResponseEnvelope::agent_reply(req.id, "data"))
    });
    mesh.agent("writer", 8452, None, common::echo_agent());

    let (tx, mut rx) = mpsc::channel(64);
    let engine = mesh.engine(EngineSettings::default()).with_events(tx);
    let run = WorkflowRun::new(TaskDecomposition::new(vec![TaskNode::new(
        "research",
        "researcher",
        "Collect data",
    )]))
    .unwrap();
    let handle = run.mutation_handle().unwrap();

    let replanner = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle
            .add_node(TaskNode::new("summary", "writer", "Summarize").with_dependency("research"))
            .await
            .unwrap();
        // Depends on a node that does not exist.
        let rejected = handle
            .add_node(TaskNode::new("orphan", "writer", "?").with_dependency("missing"))
            .await;
        assert!(matches!(rejected, Err(MutationError::Rejected(_))));
        handle
    });

    let report = engine.execute(run).await;
    let handle = replanner.await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.completed_count(), 2);
    assert_eq!(report.outcome(&id("summary")).unwrap().level, 1);
    assert!(matches!(
        handle.remove_node("summary").await,
        Err(MutationError::RunFinished)
    ));

    let mut added = false;
    while let Ok(event) = rx.try_recv() {
        if let ExecutionEvent::NodeAdded { id: node, level } = event {
            assert_eq!(node, id("summary"));
            assert_eq!(level, 1);
            added = true;
        }
    }
    assert!(added);
}

#[tokio::test(start_paused = true)]
async fn test_pending_node_removed_during_run() {
    let mesh = Mesh::new();
    let calls: Arc<Mutex<Vec<String>>> = Arc::default();
    let recorder = Arc::clone(&calls);
    mesh.agent("worker", 8461, None, move |req: ProtocolEnvelope| {
        recorder.lock().unwrap().push(req.params.message.joined_text());
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, TransportError>(ResponseEnvelope::agent_reply(req.id, "ok"))
        }
    });

    let run = WorkflowRun::new(TaskDecomposition::new(vec![
        TaskNode::new("first", "worker", "first"),
        TaskNode::new("second", "worker", "second").with_dependency("first"),
    ]))
    .unwrap();
    let handle = run.mutation_handle().unwrap();
    let engine = mesh.engine(EngineSettings::default());

    let (report, removed) = tokio::join!(engine.execute(run), async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let removed = handle.remove_node("second").await;
        drop(handle);
        removed
    });

    assert!(removed.is_ok());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(*calls.lock().unwrap(), vec!["first".to_string()]);
}
