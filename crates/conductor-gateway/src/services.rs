use std::sync::Arc;

use tracing::{debug, info};

use conductor_core::config::{AgentConfig, AppConfig};
use conductor_core::error::Result;
use conductor_core::event::EventBus;
use conductor_core::workflow::Workflow;
use conductor_engine::{
    AgentRegistry, DefaultStageExecutor, OrchestrationEngine, SessionManager, WorkerRegistry,
};
use conductor_http::{create_gate, create_worker};

/// Everything a running Conductor instance is made of, wired from config.
#[derive(Clone)]
pub struct Services {
    pub event_bus: Arc<EventBus>,
    pub registry: Arc<AgentRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<OrchestrationEngine>,
}

impl Services {
    /// Build the registries, gate, and engine, and register every configured
    /// agent. Workflows are not registered.
    pub fn new(config: &AppConfig) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let registry = Arc::new(AgentRegistry::new());
        let workers = Arc::new(WorkerRegistry::new());
        let sessions = Arc::new(
            SessionManager::new(registry.clone()).with_event_bus(event_bus.clone()),
        );
        let gate = create_gate(&config.policy);
        let executor = Arc::new(DefaultStageExecutor::new(
            registry.clone(),
            workers.clone(),
            gate,
            event_bus.clone(),
        ));
        let engine = Arc::new(
            OrchestrationEngine::new(config.engine.clone(), executor, event_bus.clone())
                .with_sessions(sessions.clone()),
        );

        let services = Self {
            event_bus,
            registry,
            workers,
            sessions,
            engine,
        };
        for agent in &config.agents {
            services.add_agent(agent);
        }
        info!(agents = config.agents.len(), "Services initialized");
        services
    }

    /// `new` plus registration of every configured workflow.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let services = Self::new(config);
        services.register_workflows(&config.workflows)?;
        Ok(services)
    }

    /// Register (or replace) an agent and bind its worker, if it declares one.
    pub fn add_agent(&self, agent: &AgentConfig) {
        self.registry.register(agent.to_record());
        if let Some(worker) = &agent.worker {
            self.workers
                .register_arc(agent.id.clone(), create_worker(&agent.id, worker));
            debug!(agent_id = %agent.id, "Worker bound");
        }
    }

    /// Register workflows in order, stopping at the first invalid one.
    /// Returns each workflow id with its topological stage order.
    pub fn register_workflows(&self, workflows: &[Workflow]) -> Result<Vec<(String, Vec<String>)>> {
        workflows
            .iter()
            .map(|wf| {
                let order = self.engine.register_workflow(wf.clone())?;
                Ok((wf.id.clone(), order))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[agents]]
id = "triage_agent"
type = "triage"
capabilities = ["triage"]

[agents.worker]
kind = "static"
output = { category = "network" }

[[agents]]
id = "observer"
type = "audit"

[[workflows]]
id = "wf"
name = "Workflow"

[[workflows.stages]]
id = "triage"
name = "Triage"
requirements = { type = "triage" }
"#;

    #[tokio::test]
    async fn wires_agents_workers_and_workflows() {
        let config = AppConfig::parse(CONFIG).unwrap();
        let services = Services::from_config(&config).unwrap();
        assert_eq!(services.registry.len(), 2);
        assert_eq!(services.workers.list(), vec!["triage_agent"]);
        assert!(services.engine.workflow("wf").is_some());
    }

    #[tokio::test]
    async fn register_workflows_reports_order_and_stops_on_error() {
        let services = Services::new(&AppConfig::default());
        let config = AppConfig::parse(CONFIG).unwrap();
        let orders = services.register_workflows(&config.workflows).unwrap();
        assert_eq!(orders, vec![("wf".to_string(), vec!["triage".to_string()])]);
        assert!(services.register_workflows(&config.workflows).is_err());
    }
}
