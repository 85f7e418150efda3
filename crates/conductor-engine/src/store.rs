use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;

use conductor_core::execution::Execution;
use conductor_core::types::ExecutionId;

/// In-memory index of executions.
///
/// Each execution's scheduler owns the `watch::Sender` and publishes a fresh
/// snapshot after every committed mutation; readers only ever see committed
/// state and never wait on the scheduler.
pub struct ExecutionStore {
    entries: RwLock<HashMap<ExecutionId, watch::Receiver<Execution>>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Track a new execution and hand back the sender its scheduler commits through.
    pub fn insert(&self, execution: Execution) -> watch::Sender<Execution> {
        let id = execution.id.clone();
        let (tx, rx) = watch::channel(execution);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, rx);
        tx
    }

    /// Latest committed snapshot.
    pub fn get(&self, id: &ExecutionId) -> Option<Execution> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|rx| rx.borrow().clone())
    }

    pub fn subscribe(&self, id: &ExecutionId) -> Option<watch::Receiver<Execution>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All snapshots, oldest first.
    pub fn list(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|rx| rx.borrow().clone())
            .collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        executions
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::execution::{ExecutionStatus, StageStatus};
    use conductor_core::types::DataMap;
    use conductor_core::workflow::{Workflow, WorkflowStage};

    fn execution() -> Execution {
        let wf = Workflow::new("wf", "One", vec![WorkflowStage::new("a", "A")]);
        Execution::new(&wf, DataMap::new())
    }

    #[test]
    fn readers_see_committed_snapshots() {
        let store = ExecutionStore::new();
        let mut exec = execution();
        let id = exec.id.clone();
        let tx = store.insert(exec.clone());

        assert_eq!(store.get(&id).unwrap().status_of("a"), Some(StageStatus::Pending));

        exec.stage_status.insert("a".into(), StageStatus::Running);
        tx.send_replace(exec.clone());
        assert_eq!(store.get(&id).unwrap().status_of("a"), Some(StageStatus::Running));

        exec.status = ExecutionStatus::Completed;
        tx.send_replace(exec);
        assert!(store.get(&id).unwrap().is_terminal());
    }

    #[test]
    fn unknown_id() {
        let store = ExecutionStore::new();
        assert!(store.get(&ExecutionId::new()).is_none());
        assert!(store.subscribe(&ExecutionId::new()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_survives_scheduler_drop() {
        let store = ExecutionStore::new();
        let exec = execution();
        let id = exec.id.clone();
        drop(store.insert(exec));
        assert!(store.get(&id).is_some());
        assert_eq!(store.list().len(), 1);
    }
}
