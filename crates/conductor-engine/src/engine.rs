//! Orchestration engine: workflow registration and DAG execution.
//!
//! `execute_workflow` creates an `Execution`, hands it to a dedicated
//! scheduler task, and returns the id immediately. The scheduler is the only
//! writer of that execution: it keeps a ready set (pending stages whose
//! dependencies all succeeded), runs ready stages concurrently through the
//! injected `StageExecutor`, applies retry and skip rules as attempts
//! finish, and publishes a snapshot after every committed change.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::lazy;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use conductor_core::config::{EngineConfig, RetryConfig};
use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::execution::{Execution, ExecutionStatus, StageError, StageStatus};
use conductor_core::traits::StageExecutor;
use conductor_core::types::{
    AttemptOutcome, DataMap, ExecutionId, OrchestrationEvent, SessionId, StageContext,
};
use conductor_core::workflow::{Workflow, WorkflowStage};

use crate::session::SessionManager;
use crate::store::ExecutionStore;

/// Optional knobs for a single execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Active session to close when the execution finishes.
    pub session_id: Option<SessionId>,
}

/// Registers workflows and runs executions of them.
pub struct OrchestrationEngine {
    config: EngineConfig,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    store: Arc<ExecutionStore>,
    executor: Arc<dyn StageExecutor>,
    sessions: Option<Arc<SessionManager>>,
    event_bus: Arc<EventBus>,
}

impl OrchestrationEngine {
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn StageExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            workflows: RwLock::new(HashMap::new()),
            store: Arc::new(ExecutionStore::new()),
            executor,
            sessions: None,
            event_bus,
        }
    }

    /// Attach a session manager so executions can close a bound session.
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Validate and store a workflow. Returns its stages in topological order.
    ///
    /// Workflows are immutable once registered; reusing an id is rejected.
    pub fn register_workflow(&self, workflow: Workflow) -> Result<Vec<String>> {
        let order = workflow.validate()?;

        let mut workflows = self.workflows.write().unwrap_or_else(PoisonError::into_inner);
        if workflows.contains_key(&workflow.id) {
            return Err(ConductorError::InvalidWorkflow(format!(
                "workflow '{}' is already registered",
                workflow.id
            )));
        }
        let id = workflow.id.clone();
        let stages = workflow.stages.len();
        workflows.insert(id.clone(), Arc::new(workflow));
        drop(workflows);

        info!(workflow_id = %id, stages, order = ?order, "Workflow registered");
        self.event_bus.publish(OrchestrationEvent::WorkflowRegistered {
            workflow_id: id,
            stages,
        });
        Ok(order)
    }

    pub fn workflow(&self, id: &str) -> Option<Arc<Workflow>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Registered workflows, sorted by id.
    pub fn list_workflows(&self) -> Vec<Arc<Workflow>> {
        let mut workflows: Vec<Arc<Workflow>> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    /// Start an execution and return its id without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn execute_workflow(&self, workflow_id: &str, input: DataMap) -> Result<ExecutionId> {
        self.execute_workflow_with(workflow_id, input, ExecuteOptions::default())
            .await
    }

    pub async fn execute_workflow_with(
        &self,
        workflow_id: &str,
        input: DataMap,
        options: ExecuteOptions,
    ) -> Result<ExecutionId> {
        let workflow = self
            .workflow(workflow_id)
            .ok_or_else(|| ConductorError::UnknownWorkflow(workflow_id.to_string()))?;

        if let Some(session_id) = &options.session_id {
            let active = self
                .sessions
                .as_ref()
                .and_then(|s| s.get_session(session_id))
                .is_some_and(|s| s.is_active());
            if !active {
                return Err(ConductorError::NotFound(format!("active session {}", session_id)));
            }
        }

        let execution = Execution::new(&workflow, input);
        let id = execution.id.clone();
        let publisher = self.store.insert(execution.clone());

        info!(execution_id = %id, workflow_id = %workflow.id, "Execution started");
        self.event_bus.publish(OrchestrationEvent::ExecutionStarted {
            execution_id: id.clone(),
            workflow_id: workflow.id.clone(),
        });

        let scheduler = Scheduler {
            workflow,
            execution,
            publisher,
            executor: self.executor.clone(),
            event_bus: self.event_bus.clone(),
            sessions: self.sessions.clone(),
            session_id: options.session_id,
            default_timeout: self.config.default_timeout(),
            retry: self.config.retry.clone(),
            failed_agents: HashMap::new(),
            tasks: HashMap::new(),
        };
        tokio::spawn(scheduler.run());

        Ok(id)
    }

    /// Most recently committed snapshot of an execution.
    pub fn get_execution_status(&self, id: &ExecutionId) -> Result<Execution> {
        self.store
            .get(id)
            .ok_or_else(|| ConductorError::NotFound(format!("execution {}", id)))
    }

    /// Resolve once the execution reaches `Completed` or `Failed`.
    pub async fn wait_for_completion(&self, id: &ExecutionId) -> Result<Execution> {
        let mut rx = self
            .store
            .subscribe(id)
            .ok_or_else(|| ConductorError::NotFound(format!("execution {}", id)))?;
        if rx.wait_for(|e| e.is_terminal()).await.is_err() {
            // Scheduler is gone; report what it last committed
            debug!(execution_id = %id, "Execution publisher dropped");
        }
        let snapshot = rx.borrow().clone();
        Ok(snapshot)
    }

    /// All executions, oldest first.
    pub fn list_executions(&self) -> Vec<Execution> {
        self.store.list()
    }
}

/// Merge the execution input with each dependency's output, in declared
/// dependency order; later keys overwrite earlier ones.
pub fn compose_input(
    input: &DataMap,
    stage: &WorkflowStage,
    results: &BTreeMap<String, DataMap>,
) -> DataMap {
    let mut composed = input.clone();
    for dep in &stage.dependencies {
        if let Some(output) = results.get(dep) {
            for (k, v) in output {
                composed.insert(k.clone(), v.clone());
            }
        }
    }
    composed
}

/// Exponential backoff with jitter before retry number `retry` (1-based).
fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
    if config.initial_backoff_ms == 0 {
        return Duration::ZERO;
    }
    let exp = 2u64.saturating_pow(retry.saturating_sub(1));
    let ms = config
        .initial_backoff_ms
        .saturating_mul(exp)
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

type AttemptResult = (String, AttemptOutcome, u64);

/// Single writer for one execution.
struct Scheduler {
    workflow: Arc<Workflow>,
    execution: Execution,
    publisher: watch::Sender<Execution>,
    executor: Arc<dyn StageExecutor>,
    event_bus: Arc<EventBus>,
    sessions: Option<Arc<SessionManager>>,
    session_id: Option<SessionId>,
    default_timeout: Duration,
    retry: RetryConfig,
    /// Agents that failed each stage so far, in order.
    failed_agents: HashMap<String, Vec<String>>,
    /// In-flight attempt tasks by stage.
    tasks: HashMap<task::Id, String>,
}

impl Scheduler {
    async fn run(mut self) {
        let start = Instant::now();
        let mut in_flight: JoinSet<AttemptResult> = JoinSet::new();

        self.dispatch_ready(&mut in_flight);
        self.commit();

        while let Some(joined) = in_flight.join_next_with_id().await {
            match joined {
                Ok((task_id, (stage_id, outcome, elapsed_ms))) => {
                    self.tasks.remove(&task_id);
                    self.apply(&mut in_flight, stage_id, outcome, elapsed_ms);
                }
                Err(e) => {
                    let Some(stage_id) = self.tasks.remove(&e.id()) else {
                        error!(execution_id = %self.execution.id, error = %e, "Untracked stage task aborted");
                        continue;
                    };
                    error!(execution_id = %self.execution.id, stage_id = %stage_id, error = %e, "Stage task aborted");
                    let err = ConductorError::Worker {
                        agent: "unknown".into(),
                        message: format!("stage task aborted: {}", e),
                    };
                    self.execution
                        .stage_errors
                        .insert(stage_id.clone(), StageError::from_error(&err, None));
                    self.fail_stage(&stage_id, &err);
                }
            }
            self.dispatch_ready(&mut in_flight);
            self.commit();
        }

        self.finish(start.elapsed().as_millis() as u64);
    }

    fn commit(&self) {
        self.publisher.send_replace(self.execution.clone());
    }

    /// Pending stages whose dependencies have all succeeded, in declaration order.
    fn ready_stages(&self) -> Vec<String> {
        self.workflow
            .stages
            .iter()
            .filter(|s| self.execution.status_of(&s.id) == Some(StageStatus::Pending))
            .filter(|s| {
                s.dependencies
                    .iter()
                    .all(|d| self.execution.status_of(d) == Some(StageStatus::Succeeded))
            })
            .map(|s| s.id.clone())
            .collect()
    }

    fn dispatch_ready(&mut self, in_flight: &mut JoinSet<AttemptResult>) {
        for stage_id in self.ready_stages() {
            self.execution
                .stage_status
                .insert(stage_id.clone(), StageStatus::Running);
            self.spawn_attempt(in_flight, &stage_id, Duration::ZERO);
        }
    }

    fn spawn_attempt(&mut self, in_flight: &mut JoinSet<AttemptResult>, stage_id: &str, delay: Duration) {
        let Some(stage) = self.workflow.stage(stage_id) else {
            return;
        };
        let mut stage = stage.clone();
        stage.timeout = Some(stage.timeout.unwrap_or(self.default_timeout));

        let attempt = self
            .execution
            .stage_attempts
            .get(stage_id)
            .copied()
            .unwrap_or(0);
        let ctx = StageContext {
            workflow_id: self.workflow.id.clone(),
            execution_id: self.execution.id.clone(),
            input: compose_input(&self.execution.input_data, &stage, &self.execution.stage_results),
            stage,
            attempt,
            failed_agents: self.failed_agents.get(stage_id).cloned().unwrap_or_default(),
        };

        debug!(
            execution_id = %self.execution.id,
            stage_id = %stage_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Dispatching stage attempt"
        );

        let executor = self.executor.clone();
        let event_bus = self.event_bus.clone();
        let execution_id = self.execution.id.clone();
        let task_stage = stage_id.to_string();
        let handle = in_flight.spawn(async move {
            let stage_id = task_stage;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event_bus.publish(OrchestrationEvent::StageStarted {
                execution_id,
                stage_id: stage_id.clone(),
                attempt,
            });
            let started = Instant::now();
            // The guard covers the `execute` call, not only its future
            let outcome = AssertUnwindSafe(lazy(|_| executor.execute(ctx)).flatten())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    AttemptOutcome::failure(
                        None,
                        ConductorError::Worker {
                            agent: "unknown".into(),
                            message: "stage executor panicked".into(),
                        },
                    )
                });
            (stage_id, outcome, started.elapsed().as_millis() as u64)
        });
        self.tasks.insert(handle.id(), stage_id.to_string());
    }

    fn apply(
        &mut self,
        in_flight: &mut JoinSet<AttemptResult>,
        stage_id: String,
        outcome: AttemptOutcome,
        elapsed_ms: u64,
    ) {
        let execution_id = self.execution.id.clone();
        match outcome.result {
            Ok(output) => {
                info!(execution_id = %execution_id, stage_id = %stage_id, elapsed_ms, "Stage succeeded");
                self.execution
                    .stage_status
                    .insert(stage_id.clone(), StageStatus::Succeeded);
                self.execution.stage_results.insert(stage_id.clone(), output);
                self.execution.stage_errors.remove(&stage_id);
                if let Some(agent) = &outcome.agent_id {
                    self.execution
                        .stage_agents
                        .insert(stage_id.clone(), agent.clone());
                }
                self.event_bus.publish(OrchestrationEvent::StageSucceeded {
                    execution_id,
                    stage_id,
                    agent_id: outcome.agent_id,
                    elapsed_ms,
                });
            }
            Err(err) => {
                self.execution.stage_errors.insert(
                    stage_id.clone(),
                    StageError::from_error(&err, outcome.agent_id.clone()),
                );
                if let Some(agent) = outcome.agent_id {
                    self.failed_agents
                        .entry(stage_id.clone())
                        .or_default()
                        .push(agent);
                }

                if !err.is_retryable() {
                    warn!(execution_id = %execution_id, stage_id = %stage_id, error = %err, "Stage failed (not retryable)");
                    self.fail_stage(&stage_id, &err);
                    return;
                }

                let max_retries = self
                    .workflow
                    .stage(&stage_id)
                    .map(|s| s.retry_policy.max_retries)
                    .unwrap_or(0);
                let attempts = self
                    .execution
                    .stage_attempts
                    .entry(stage_id.clone())
                    .or_insert(0);
                *attempts += 1;
                let retry = *attempts;

                if retry <= max_retries {
                    let backoff = calculate_backoff(retry, &self.retry);
                    warn!(
                        execution_id = %execution_id,
                        stage_id = %stage_id,
                        retry,
                        max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying stage"
                    );
                    self.event_bus.publish(OrchestrationEvent::StageRetrying {
                        execution_id,
                        stage_id: stage_id.clone(),
                        attempt: retry,
                        error: err.to_string(),
                    });
                    self.spawn_attempt(in_flight, &stage_id, backoff);
                } else {
                    warn!(execution_id = %execution_id, stage_id = %stage_id, retries = max_retries, error = %err, "Stage failed, retries exhausted");
                    self.fail_stage(&stage_id, &err);
                }
            }
        }
    }

    /// Mark a stage failed and skip everything downstream of it.
    fn fail_stage(&mut self, stage_id: &str, err: &ConductorError) {
        let execution_id = self.execution.id.clone();
        self.execution
            .stage_status
            .insert(stage_id.to_string(), StageStatus::Failed);
        self.event_bus.publish(OrchestrationEvent::StageFailed {
            execution_id: execution_id.clone(),
            stage_id: stage_id.to_string(),
            kind: err.kind().to_string(),
            error: err.to_string(),
        });

        for dependent in self.workflow.transitive_dependents(stage_id) {
            if self.execution.status_of(&dependent) != Some(StageStatus::Pending) {
                continue;
            }
            debug!(execution_id = %execution_id, stage_id = %dependent, cause = %stage_id, "Skipping stage");
            self.execution
                .stage_status
                .insert(dependent.clone(), StageStatus::Skipped);
            self.execution
                .stage_errors
                .insert(dependent.clone(), StageError::skipped(stage_id));
            self.event_bus.publish(OrchestrationEvent::StageSkipped {
                execution_id: execution_id.clone(),
                stage_id: dependent,
                cause: stage_id.to_string(),
            });
        }
    }

    fn finish(mut self, elapsed_ms: u64) {
        // Nothing is in flight any more; anything not terminal is unreachable.
        let leftovers: Vec<(String, StageStatus)> = self
            .execution
            .stage_status
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(id, s)| (id.clone(), *s))
            .collect();
        for (id, status) in leftovers {
            let next = if status == StageStatus::Running {
                StageStatus::Failed
            } else {
                StageStatus::Skipped
            };
            warn!(execution_id = %self.execution.id, stage_id = %id, ?status, ?next, "Stage left unfinished");
            self.execution.stage_status.insert(id, next);
        }

        let all_succeeded = self
            .execution
            .stage_status
            .values()
            .all(|s| *s == StageStatus::Succeeded || *s == StageStatus::Skipped);
        let any_failed = self
            .execution
            .stage_status
            .values()
            .any(|s| *s == StageStatus::Failed);
        self.execution.status = if all_succeeded && !any_failed {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.execution.ended_at = Some(Utc::now());

        if let (Some(sessions), Some(session_id)) = (&self.sessions, &self.session_id) {
            if let Err(e) = sessions.close_session(session_id) {
                debug!(session_id = %session_id, error = %e, "Bound session already closed");
            }
        }

        info!(
            execution_id = %self.execution.id,
            workflow_id = %self.execution.workflow_id,
            status = %self.execution.status,
            elapsed_ms,
            "Execution finished"
        );
        self.commit();
        self.event_bus.publish(OrchestrationEvent::ExecutionFinished {
            execution_id: self.execution.id.clone(),
            workflow_id: self.execution.workflow_id.clone(),
            status: self.execution.status,
            elapsed_ms,
        });
    }
}
