use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;

use conductor_core::error::Result;
use conductor_core::traits::Worker;
use conductor_core::types::DataMap;

/// Binds agent ids to the workers that perform their stages.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a worker to an agent id, replacing any previous binding.
    pub fn register(&self, agent_id: impl Into<String>, worker: impl Worker) {
        self.register_arc(agent_id, Arc::new(worker));
    }

    pub fn register_arc(&self, agent_id: impl Into<String>, worker: Arc<dyn Worker>) {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.into(), worker);
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_id)
            .is_some()
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Worker>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    /// Bound agent ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker that always answers with a fixed mapping.
pub struct StaticWorker {
    output: DataMap,
}

impl StaticWorker {
    pub fn new(output: DataMap) -> Self {
        Self { output }
    }
}

impl Worker for StaticWorker {
    fn invoke(&self, _input: DataMap) -> BoxFuture<'_, Result<DataMap>> {
        let output = self.output.clone();
        Box::pin(async move { Ok(output) })
    }
}
