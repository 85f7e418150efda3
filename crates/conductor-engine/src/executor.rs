use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use conductor_core::agent::AgentRecord;
use conductor_core::error::ConductorError;
use conductor_core::event::EventBus;
use conductor_core::policy::PolicyRequest;
use conductor_core::traits::{AuthorizationGate, StageExecutor};
use conductor_core::types::{AttemptOutcome, OrchestrationEvent, StageContext};

use crate::registry::AgentRegistry;
use crate::workers::WorkerRegistry;

/// Timeout used when a context arrives without one.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// The standard stage protocol: select an agent, authorize it, invoke its
/// worker under the stage timeout.
pub struct DefaultStageExecutor {
    registry: Arc<AgentRegistry>,
    workers: Arc<WorkerRegistry>,
    gate: Arc<dyn AuthorizationGate>,
    event_bus: Arc<EventBus>,
}

impl DefaultStageExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        workers: Arc<WorkerRegistry>,
        gate: Arc<dyn AuthorizationGate>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            workers,
            gate,
            event_bus,
        }
    }

    /// First candidate for the stage, passing over agents that already
    /// failed it when another candidate exists.
    fn select_agent(&self, ctx: &StageContext) -> Option<AgentRecord> {
        let mut candidates = self.registry.find_candidates(&ctx.stage.requirements);
        let first = candidates.next()?;
        if !ctx.failed_agents.contains(&first.id) {
            return Some(first);
        }
        candidates
            .find(|c| !ctx.failed_agents.contains(&c.id))
            .or(Some(first))
    }

    async fn run(&self, ctx: StageContext) -> AttemptOutcome {
        let stage_id = ctx.stage.id.clone();

        // a. select
        let Some(agent) = self.select_agent(&ctx) else {
            warn!(stage_id = %stage_id, "No suitable agent for stage");
            return AttemptOutcome::failure(
                None,
                ConductorError::NoSuitableAgent { stage: stage_id },
            );
        };
        debug!(stage_id = %stage_id, agent_id = %agent.id, attempt = ctx.attempt, "Agent selected");
        self.event_bus.publish(OrchestrationEvent::AgentSelected {
            execution_id: ctx.execution_id.clone(),
            stage_id: stage_id.clone(),
            agent_id: agent.id.clone(),
        });

        // b. authorize
        let request = PolicyRequest::execute_stage(&agent.id, &stage_id, &ctx.workflow_id);
        let decision = match self.gate.evaluate(request.clone()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(stage_id = %stage_id, agent_id = %agent.id, error = %e, "Policy evaluation failed");
                let err = match e {
                    ConductorError::PolicyUnavailable(_) => e,
                    other => ConductorError::PolicyUnavailable(other.to_string()),
                };
                return AttemptOutcome::failure(Some(agent.id), err);
            }
        };
        self.event_bus.publish(OrchestrationEvent::PolicyEvaluated {
            execution_id: ctx.execution_id.clone(),
            stage_id: stage_id.clone(),
            agent_id: agent.id.clone(),
            action: request.action.clone(),
            allow: decision.allow,
            decision: decision.raw.clone(),
        });
        if !decision.allow {
            return AttemptOutcome::failure(
                Some(agent.id.clone()),
                ConductorError::PolicyDenied {
                    agent: agent.id,
                    stage: stage_id,
                    reason: decision.reason.unwrap_or_else(|| "denied".to_string()),
                },
            );
        }

        // c. input was composed by the scheduler; d. invoke
        let Some(worker) = self.workers.get(&agent.id) else {
            return AttemptOutcome::failure(
                Some(agent.id.clone()),
                ConductorError::Worker {
                    agent: agent.id,
                    message: "no worker bound to agent".into(),
                },
            );
        };

        let timeout = ctx.stage.timeout.unwrap_or(FALLBACK_TIMEOUT);
        match tokio::time::timeout(timeout, worker.invoke(ctx.input)).await {
            Ok(Ok(output)) => AttemptOutcome::success(agent.id, output),
            Ok(Err(e)) => {
                let err = match e {
                    ConductorError::Worker { .. } => e,
                    other => ConductorError::Worker {
                        agent: agent.id.clone(),
                        message: other.to_string(),
                    },
                };
                AttemptOutcome::failure(Some(agent.id), err)
            }
            // The worker future is dropped here; a late reply has nowhere to go.
            Err(_) => AttemptOutcome::failure(
                Some(agent.id),
                ConductorError::Timeout {
                    stage: stage_id,
                    timeout_ms: timeout.as_millis() as u64,
                },
            ),
        }
    }
}

impl StageExecutor for DefaultStageExecutor {
    fn execute(&self, ctx: StageContext) -> BoxFuture<'_, AttemptOutcome> {
        Box::pin(self.run(ctx))
    }
}
