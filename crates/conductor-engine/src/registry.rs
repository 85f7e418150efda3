use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use conductor_core::agent::{A2aCapabilities, AgentRecord, AgentRequirements};

/// Registry of known agents and their declared capabilities.
///
/// Shared across executions; every operation takes the lock once, so a
/// reader never observes a partially written record.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Create or replace an agent record.
    pub fn register_agent<I, S>(
        &self,
        id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: I,
        trust_level: f64,
        a2a: A2aCapabilities,
    ) -> AgentRecord
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = AgentRecord::new(id, agent_type, capabilities, trust_level, a2a);
        self.register(record.clone());
        record
    }

    /// Insert a prepared record, replacing any previous one with the same id.
    pub fn register(&self, record: AgentRecord) {
        debug!(agent_id = %record.id, agent_type = %record.agent_type, "Registering agent");
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    pub fn unregister(&self, id: &str) -> Option<AgentRecord> {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<AgentRecord> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// All records, sorted by id.
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Agents satisfying `requirements`, highest trust first, then by id.
    ///
    /// The registry is snapshotted once; requirements are evaluated lazily
    /// as the sequence is consumed.
    pub fn find_candidates(&self, requirements: &AgentRequirements) -> Candidates {
        let mut records: Vec<AgentRecord> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.trust_level
                .total_cmp(&a.trust_level)
                .then_with(|| a.id.cmp(&b.id))
        });
        Candidates {
            records: records.into_iter(),
            requirements: requirements.clone(),
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered sequence of agents matching a requirement set.
pub struct Candidates {
    records: std::vec::IntoIter<AgentRecord>,
    requirements: AgentRequirements,
}

impl Iterator for Candidates {
    type Item = AgentRecord;

    fn next(&mut self) -> Option<AgentRecord> {
        let requirements = &self.requirements;
        self.records.by_ref().find(|r| requirements.matches(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn seed(registry: &AgentRegistry) {
        registry.register_agent("triage_b", "triage", ["triage"], 0.7, A2aCapabilities::default());
        registry.register_agent("triage_a", "triage", ["triage"], 0.7, A2aCapabilities::default());
        registry.register_agent(
            "triage_top",
            "triage",
            ["triage", "categorize"],
            0.95,
            A2aCapabilities::default(),
        );
        registry.register_agent(
            "security_agent",
            "security",
            ["security", "compliance"],
            1.0,
            A2aCapabilities::default(),
        );
    }

    #[test]
    fn candidates_ordered_by_trust_then_id() {
        let registry = AgentRegistry::new();
        seed(&registry);

        let ids: Vec<String> = registry
            .find_candidates(&AgentRequirements::of_type("triage"))
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["triage_top", "triage_a", "triage_b"]);
    }

    #[test]
    fn capability_subset_filter() {
        let registry = AgentRegistry::new();
        seed(&registry);

        let ids: Vec<String> = registry
            .find_candidates(&AgentRequirements::of_type("triage").with_capabilities(["categorize"]))
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["triage_top"]);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let registry = AgentRegistry::new();
        seed(&registry);
        assert_eq!(
            registry
                .find_candidates(&AgentRequirements::of_type("escalation_manager"))
                .count(),
            0
        );
    }

    #[test]
    fn reregistration_is_upsert() {
        let registry = AgentRegistry::new();
        registry.register_agent("a", "triage", ["triage"], 0.5, A2aCapabilities::default());
        registry.register_agent("a", "security", ["security"], 0.9, A2aCapabilities::default());
        assert_eq!(registry.len(), 1);
        let record = registry.get("a").unwrap();
        assert_eq!(record.agent_type, "security");
        assert_eq!(record.trust_level, 0.9);
    }

    #[test]
    fn unregister_removes() {
        let registry = AgentRegistry::new();
        seed(&registry);
        assert!(registry.unregister("security_agent").is_some());
        assert!(!registry.contains("security_agent"));
        assert!(registry.unregister("security_agent").is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let registry = AgentRegistry::new();
        seed(&registry);
        let mut candidates = registry.find_candidates(&AgentRequirements::of_type("triage"));
        registry.unregister("triage_a");
        assert_eq!(candidates.next().unwrap().id, "triage_top");
        assert_eq!(candidates.next().unwrap().id, "triage_a");
    }

    #[test]
    fn concurrent_register_and_find() {
        let registry = Arc::new(AgentRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.register_agent(
                            format!("agent-{}-{}", i, j),
                            "worker",
                            ["work"],
                            0.5,
                            A2aCapabilities::default(),
                        );
                        for record in registry.find_candidates(&AgentRequirements::of_type("worker")) {
                            assert!(record.capabilities.contains("work"));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }
}
