pub mod opa;
pub mod worker;

use std::sync::Arc;

use conductor_core::config::{PolicyConfig, WorkerConfig};
use conductor_core::traits::{AuthorizationGate, Worker};
use conductor_engine::{StaticGate, StaticWorker};

pub use opa::OpaGate;
pub use worker::HttpWorker;

/// Build the worker described by an agent's `[agents.worker]` table.
pub fn create_worker(agent_id: &str, config: &WorkerConfig) -> Arc<dyn Worker> {
    match config {
        WorkerConfig::Static { output } => Arc::new(StaticWorker::new(output.clone())),
        WorkerConfig::Http {
            url,
            token,
            headers,
        } => Arc::new(HttpWorker::new(agent_id, url, token.clone(), headers.clone())),
    }
}

/// Build the authorization gate selected by `[policy] mode`.
pub fn create_gate(config: &PolicyConfig) -> Arc<dyn AuthorizationGate> {
    match config {
        PolicyConfig::Static(policy) => Arc::new(StaticGate::new(policy.clone())),
        PolicyConfig::Opa(opa) => Arc::new(OpaGate::new(opa)),
    }
}
