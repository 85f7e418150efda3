//! Mock workers, authorization gates, and fixtures shared by Conductor tests.
//!
//! Every mock is cheap to clone and shares its counters between clones, so a
//! test can register one copy and inspect another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use conductor_core::agent::{A2aCapabilities, AgentRecord, AgentRequirements};
use conductor_core::error::{ConductorError, Result};
use conductor_core::policy::{PolicyDecision, PolicyRequest};
use conductor_core::traits::{AuthorizationGate, Worker};
use conductor_core::types::DataMap;
use conductor_core::workflow::WorkflowStage;

// ── Fixtures ────────────────────────────────────────────────────

/// Turn a `json!` object into a `DataMap`. Non-objects become an empty map.
pub fn data(value: serde_json::Value) -> DataMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => DataMap::new(),
    }
}

/// A fully trusted, collaborative agent whose only capability is its type.
pub fn agent(id: &str, agent_type: &str) -> AgentRecord {
    AgentRecord::new(id, agent_type, [agent_type], 1.0, A2aCapabilities::default())
}

/// A stage with no requirements and the given dependencies.
pub fn stage(id: &str, deps: &[&str]) -> WorkflowStage {
    WorkflowStage::new(id, id).with_dependencies(deps.iter().copied())
}

/// A stage that needs an agent of `agent_type`.
pub fn typed_stage(id: &str, agent_type: &str, deps: &[&str]) -> WorkflowStage {
    stage(id, deps).with_requirements(AgentRequirements::of_type(agent_type))
}

// ── Workers ─────────────────────────────────────────────────────

/// Returns its input unchanged.
#[derive(Clone, Default)]
pub struct EchoWorker {
    calls: Arc<AtomicUsize>,
}

impl EchoWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Worker for EchoWorker {
    fn invoke(&self, input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(input) })
    }
}

/// Fails a fixed number of times, then returns `output`.
#[derive(Clone)]
pub struct ScriptedWorker {
    failures: usize,
    output: DataMap,
    calls: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    pub fn fail_times(failures: usize, output: DataMap) -> Self {
        Self {
            failures,
            output,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Worker for ScriptedWorker {
    fn invoke(&self, _input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if call < self.failures {
                Err(ConductorError::Worker {
                    agent: "scripted".into(),
                    message: format!("scripted failure {}", call + 1),
                })
            } else {
                Ok(self.output.clone())
            }
        })
    }
}

/// Always fails with the same message.
#[derive(Clone)]
pub struct FailingWorker {
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingWorker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Worker for FailingWorker {
    fn invoke(&self, _input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Err(ConductorError::Io(std::io::Error::other(self.message.clone()))) })
    }
}

/// Sleeps before answering; counts how many calls ran to completion.
#[derive(Clone)]
pub struct SlowWorker {
    delay: Duration,
    output: DataMap,
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl SlowWorker {
    pub fn new(delay: Duration, output: DataMap) -> Self {
        Self {
            delay,
            output,
            started: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Worker for SlowWorker {
    fn invoke(&self, _input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        })
    }
}

/// Records every input it sees and returns `output`.
#[derive(Clone)]
pub struct RecordingWorker {
    output: DataMap,
    inputs: Arc<Mutex<Vec<DataMap>>>,
}

impl RecordingWorker {
    pub fn new(output: DataMap) -> Self {
        Self {
            output,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> Vec<DataMap> {
        self.inputs.lock().unwrap().clone()
    }
}

impl Worker for RecordingWorker {
    fn invoke(&self, input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        self.inputs.lock().unwrap().push(input);
        Box::pin(async move { Ok(self.output.clone()) })
    }
}

// ── Gates ───────────────────────────────────────────────────────

/// Allows everything.
#[derive(Clone, Copy, Default)]
pub struct AllowGate;

impl AuthorizationGate for AllowGate {
    fn evaluate(&self, _request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        Box::pin(async { Ok(PolicyDecision::allow()) })
    }
}

/// Denies everything with a fixed reason.
#[derive(Clone)]
pub struct DenyGate {
    reason: String,
}

impl DenyGate {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AuthorizationGate for DenyGate {
    fn evaluate(&self, _request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        Box::pin(async move { Ok(PolicyDecision::deny(self.reason.clone())) })
    }
}

/// Cannot reach its decision point.
#[derive(Clone, Copy, Default)]
pub struct FailingGate;

impl AuthorizationGate for FailingGate {
    fn evaluate(&self, _request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        Box::pin(async {
            Err(ConductorError::PolicyUnavailable(
                "connection refused".to_string(),
            ))
        })
    }
}

/// Wraps another gate and records every request it forwards.
pub struct CountingGate<G> {
    inner: Arc<G>,
    requests: Arc<Mutex<Vec<PolicyRequest>>>,
}

impl<G> Clone for CountingGate<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<G: AuthorizationGate> CountingGate<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner: Arc::new(inner),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PolicyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl<G: AuthorizationGate> AuthorizationGate for CountingGate<G> {
    fn evaluate(&self, request: PolicyRequest) -> BoxFuture<'_, Result<PolicyDecision>> {
        self.requests.lock().unwrap().push(request.clone());
        self.inner.evaluate(request)
    }
}
