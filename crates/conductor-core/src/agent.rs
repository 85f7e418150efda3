use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Collaboration limits and affinities declared by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationMetadata {
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    #[serde(default)]
    pub preferred_partners: BTreeSet<String>,
    #[serde(default)]
    pub blacklisted_agents: BTreeSet<String>,
    #[serde(default)]
    pub specializations: BTreeSet<String>,
}

fn default_max_concurrent_sessions() -> u32 {
    5
}

impl Default for CollaborationMetadata {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            preferred_partners: BTreeSet::new(),
            blacklisted_agents: BTreeSet::new(),
            specializations: BTreeSet::new(),
        }
    }
}

/// Agent-to-agent collaboration capabilities supplied at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aCapabilities {
    #[serde(default = "default_can_collaborate")]
    pub can_collaborate: bool,
    #[serde(default)]
    pub communication_preferences: Vec<String>,
    #[serde(default)]
    pub collaboration_metadata: CollaborationMetadata,
}

fn default_can_collaborate() -> bool {
    true
}

impl Default for A2aCapabilities {
    fn default() -> Self {
        Self {
            can_collaborate: true,
            communication_preferences: vec!["async".to_string()],
            collaboration_metadata: CollaborationMetadata::default(),
        }
    }
}

impl A2aCapabilities {
    pub fn with_max_sessions(mut self, max: u32) -> Self {
        self.collaboration_metadata.max_concurrent_sessions = max;
        self
    }

    pub fn with_specializations<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaboration_metadata.specializations = specs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blacklist<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaboration_metadata.blacklisted_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn solitary(mut self) -> Self {
        self.can_collaborate = false;
        self
    }
}

/// A registered worker and its declared capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub capabilities: BTreeSet<String>,
    pub trust_level: f64,
    pub can_collaborate: bool,
    pub communication_preferences: Vec<String>,
    pub collaboration_metadata: CollaborationMetadata,
}

impl AgentRecord {
    /// Build a record, clamping `trust_level` into `[0, 1]` (NaN becomes 0).
    pub fn new<I, S>(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: I,
        trust_level: f64,
        a2a: A2aCapabilities,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let trust_level = if trust_level.is_nan() {
            0.0
        } else {
            trust_level.clamp(0.0, 1.0)
        };
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            trust_level,
            can_collaborate: a2a.can_collaborate,
            communication_preferences: a2a.communication_preferences,
            collaboration_metadata: a2a.collaboration_metadata,
        }
    }

    pub fn max_concurrent_sessions(&self) -> u32 {
        self.collaboration_metadata.max_concurrent_sessions
    }

    pub fn blacklists(&self, other: &str) -> bool {
        self.collaboration_metadata.blacklisted_agents.contains(other)
    }
}

/// A single predicate over an `AgentRecord`.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    /// `type` must equal the given string.
    TypeEquals(String),
    /// Every listed capability must be declared.
    Capabilities(BTreeSet<String>),
    /// `trust_level` must be at least this value.
    MinTrust(f64),
    /// Every listed specialization must be declared.
    Specializations(BTreeSet<String>),
}

impl Requirement {
    pub fn matches(&self, agent: &AgentRecord) -> bool {
        match self {
            Self::TypeEquals(t) => agent.agent_type == *t,
            Self::Capabilities(caps) => caps.is_subset(&agent.capabilities),
            Self::MinTrust(min) => agent.trust_level >= *min,
            Self::Specializations(specs) => {
                specs.is_subset(&agent.collaboration_metadata.specializations)
            }
        }
    }
}

/// Conjunction of requirements a stage places on its agent.
///
/// An empty set matches every agent. Serialized as a table with optional
/// `type`, `capabilities`, `min_trust`, and `specializations` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequirementsTable", into = "RequirementsTable")]
pub struct AgentRequirements {
    requirements: Vec<Requirement>,
}

impl AgentRequirements {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(agent_type: impl Into<String>) -> Self {
        Self::any().and(Requirement::TypeEquals(agent_type.into()))
    }

    pub fn and(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_capabilities<I, S>(self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.and(Requirement::Capabilities(
            caps.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_min_trust(self, min: f64) -> Self {
        self.and(Requirement::MinTrust(min))
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, agent: &AgentRecord) -> bool {
        self.requirements.iter().all(|r| r.matches(agent))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RequirementsTable {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_trust: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    specializations: BTreeSet<String>,
}

impl From<RequirementsTable> for AgentRequirements {
    fn from(table: RequirementsTable) -> Self {
        let mut reqs = AgentRequirements::any();
        if let Some(t) = table.agent_type {
            reqs = reqs.and(Requirement::TypeEquals(t));
        }
        if !table.capabilities.is_empty() {
            reqs = reqs.and(Requirement::Capabilities(table.capabilities));
        }
        if let Some(min) = table.min_trust {
            reqs = reqs.and(Requirement::MinTrust(min));
        }
        if !table.specializations.is_empty() {
            reqs = reqs.and(Requirement::Specializations(table.specializations));
        }
        reqs
    }
}

impl From<AgentRequirements> for RequirementsTable {
    fn from(reqs: AgentRequirements) -> Self {
        let mut table = RequirementsTable::default();
        for req in reqs.requirements {
            match req {
                Requirement::TypeEquals(t) => table.agent_type = Some(t),
                Requirement::Capabilities(caps) => table.capabilities.extend(caps),
                Requirement::MinTrust(min) => {
                    table.min_trust = Some(table.min_trust.map_or(min, |m| m.max(min)))
                }
                Requirement::Specializations(specs) => table.specializations.extend(specs),
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triage() -> AgentRecord {
        AgentRecord::new(
            "triage_agent",
            "triage",
            ["triage", "categorize"],
            0.9,
            A2aCapabilities::default().with_specializations(["ticket triage"]),
        )
    }

    #[test]
    fn type_and_capability_match() {
        let agent = triage();
        assert!(AgentRequirements::of_type("triage").matches(&agent));
        assert!(!AgentRequirements::of_type("security").matches(&agent));
        assert!(AgentRequirements::of_type("triage")
            .with_capabilities(["triage"])
            .matches(&agent));
        assert!(!AgentRequirements::any()
            .with_capabilities(["triage", "network"])
            .matches(&agent));
    }

    #[test]
    fn trust_threshold() {
        let agent = triage();
        assert!(AgentRequirements::any().with_min_trust(0.9).matches(&agent));
        assert!(!AgentRequirements::any().with_min_trust(0.95).matches(&agent));
    }

    #[test]
    fn empty_requirements_match_everything() {
        assert!(AgentRequirements::any().matches(&triage()));
    }

    #[test]
    fn trust_is_clamped() {
        let high = AgentRecord::new("a", "t", Vec::<String>::new(), 3.0, A2aCapabilities::default());
        let nan = AgentRecord::new("b", "t", Vec::<String>::new(), f64::NAN, A2aCapabilities::default());
        assert_eq!(high.trust_level, 1.0);
        assert_eq!(nan.trust_level, 0.0);
    }

    #[test]
    fn requirements_from_table() {
        let reqs: AgentRequirements = serde_json::from_value(serde_json::json!({
            "type": "network_support",
            "capabilities": ["network"],
            "min_trust": 0.5
        }))
        .unwrap();
        assert_eq!(reqs.requirements().len(), 3);
        assert_eq!(
            reqs.requirements()[0],
            Requirement::TypeEquals("network_support".into())
        );

        let back = serde_json::to_value(&reqs).unwrap();
        assert_eq!(back["type"], "network_support");
        assert_eq!(back["min_trust"], 0.5);
    }

    #[test]
    fn specialization_requirement() {
        let agent = triage();
        let reqs: AgentRequirements =
            serde_json::from_value(serde_json::json!({"specializations": ["ticket triage"]}))
                .unwrap();
        assert!(reqs.matches(&agent));
    }
}
