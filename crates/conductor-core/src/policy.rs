use serde::{Deserialize, Serialize};

use crate::types::DataMap;

/// Action the engine asks permission for before each stage attempt.
pub const EXECUTE_STAGE: &str = "execute_stage";

/// Input to an authorization gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub agent_id: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: DataMap,
}

impl PolicyRequest {
    /// Request to run `stage_id` of `workflow_id` on `agent_id`.
    pub fn execute_stage(agent_id: &str, stage_id: &str, workflow_id: &str) -> Self {
        let mut context = DataMap::new();
        context.insert(
            "workflow_id".to_string(),
            serde_json::Value::String(workflow_id.to_string()),
        );
        Self {
            agent_id: agent_id.to_string(),
            action: EXECUTE_STAGE.to_string(),
            resource: stage_id.to_string(),
            context,
        }
    }
}

/// Answer from an authorization gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The gate's full result document, kept for auditing.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            raw: serde_json::json!({"allow": true}),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            allow: false,
            raw: serde_json::json!({"allow": false, "reason": reason}),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// A single static rule. `"*"` matches anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default = "wildcard")]
    pub agent: String,
    #[serde(default = "wildcard")]
    pub action: String,
    #[serde(default = "wildcard")]
    pub resource: String,
    pub effect: Effect,
}

fn wildcard() -> String {
    "*".to_string()
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

impl PolicyRule {
    pub fn matches(&self, req: &PolicyRequest) -> bool {
        pattern_matches(&self.agent, &req.agent_id)
            && pattern_matches(&self.action, &req.action)
            && pattern_matches(&self.resource, &req.resource)
    }
}

/// Ordered allow/deny rules with a default effect. First match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPolicy {
    #[serde(default = "default_effect")]
    pub default: Effect,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

fn default_effect() -> Effect {
    Effect::Allow
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self {
            default: Effect::Allow,
            rules: vec![],
        }
    }
}

impl StaticPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny_all() -> Self {
        Self {
            default: Effect::Deny,
            rules: vec![],
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn decide(&self, req: &PolicyRequest) -> PolicyDecision {
        match self.rules.iter().position(|r| r.matches(req)) {
            Some(i) => match self.rules[i].effect {
                Effect::Allow => PolicyDecision::allow(),
                Effect::Deny => PolicyDecision::deny(format!("denied by rule {}", i)),
            },
            None => match self.default {
                Effect::Allow => PolicyDecision::allow(),
                Effect::Deny => PolicyDecision::deny("denied by default"),
            },
        }
    }
}
