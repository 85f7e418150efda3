use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{A2aCapabilities, AgentRecord, CollaborationMetadata};
use crate::error::{ConductorError, Result};
use crate::policy::StaticPolicy;
use crate::types::DataMap;
use crate::workflow::Workflow;

/// Top-level Conductor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempt timeout for stages that do not declare one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_timeout_secs()))
    }
}

fn default_timeout_secs() -> f64 {
    300.0
}

/// Backoff between stage attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff; 0 retries immediately.
    #[serde(default)]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_backoff() -> u64 {
    30000
}

/// Where authorization decisions come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PolicyConfig {
    /// In-process rules.
    Static(StaticPolicy),
    /// Open Policy Agent data API.
    Opa(OpaConfig),
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::Static(StaticPolicy::allow_all())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpaConfig {
    #[serde(default = "default_opa_url")]
    pub opa_url: String,
    #[serde(default = "default_opa_timeout")]
    pub timeout_secs: u64,
}

fn default_opa_url() -> String {
    "http://localhost:8181/v1/data/agent/policy".to_string()
}

fn default_opa_timeout() -> u64 {
    10
}

/// JSONL audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// Also print each entry to stdout.
    #[serde(default)]
    pub to_stdout: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_audit_path(),
            to_stdout: false,
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_path() -> String {
    "audit.log".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every API call except health.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7420".to_string()
}

/// An agent to seed into the registry, with its worker binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default = "default_trust_level")]
    pub trust_level: f64,
    #[serde(default = "default_can_collaborate")]
    pub can_collaborate: bool,
    #[serde(default = "default_communication_preferences")]
    pub communication_preferences: Vec<String>,
    #[serde(default)]
    pub collaboration: CollaborationMetadata,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
}

fn default_trust_level() -> f64 {
    1.0
}

fn default_can_collaborate() -> bool {
    true
}

fn default_communication_preferences() -> Vec<String> {
    vec!["async".to_string()]
}

impl AgentConfig {
    pub fn to_record(&self) -> AgentRecord {
        AgentRecord::new(
            self.id.clone(),
            self.agent_type.clone(),
            self.capabilities.iter().cloned(),
            self.trust_level,
            A2aCapabilities {
                can_collaborate: self.can_collaborate,
                communication_preferences: self.communication_preferences.clone(),
                collaboration_metadata: self.collaboration.clone(),
            },
        )
    }
}

/// How an agent's work is performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerConfig {
    /// Always returns the configured mapping.
    Static {
        #[serde(default)]
        output: DataMap,
    },
    /// POSTs the composed input as JSON and expects a JSON object back.
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConductorError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| ConductorError::Config(e.to_string()))
    }

    pub fn gateway_or_default(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep the reference if unset
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Effect;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.engine.retry.initial_backoff_ms, 0);
        assert!(matches!(config.policy, PolicyConfig::Static(ref p) if p.default == Effect::Allow));
        assert!(config.agents.is_empty());
        assert_eq!(config.gateway_or_default().bind, "127.0.0.1:7420");
    }

    #[test]
    fn env_vars_expand() {
        std::env::set_var("CONDUCTOR_TEST_OPA_URL", "http://opa:8181/v1/data/x");
        let config = AppConfig::parse(
            r#"
[policy]
mode = "opa"
opa_url = "${CONDUCTOR_TEST_OPA_URL}"
"#,
        )
        .unwrap();
        match config.policy {
            PolicyConfig::Opa(opa) => {
                assert_eq!(opa.opa_url, "http://opa:8181/v1/data/x");
                assert_eq!(opa.timeout_secs, 10);
            }
            other => panic!("expected opa policy, got {:?}", other),
        }
    }

    #[test]
    fn unset_env_var_is_kept() {
        assert_eq!(
            expand_env_vars("token = \"${CONDUCTOR_SURELY_UNSET_VAR}\""),
            "token = \"${CONDUCTOR_SURELY_UNSET_VAR}\""
        );
    }

    #[test]
    fn agent_config_to_record() {
        let config = AppConfig::parse(
            r#"
[[agents]]
id = "network_support_agent"
type = "network_support"
capabilities = ["network", "connectivity"]
trust_level = 0.8

[agents.collaboration]
max_concurrent_sessions = 2
specializations = ["network"]

[agents.worker]
kind = "static"
output = { network_status = "ok" }
"#,
        )
        .unwrap();
        let agent = &config.agents[0];
        let record = agent.to_record();
        assert_eq!(record.agent_type, "network_support");
        assert_eq!(record.max_concurrent_sessions(), 2);
        assert!(record.can_collaborate);
        assert_eq!(record.communication_preferences, vec!["async"]);
        match agent.worker.as_ref().unwrap() {
            WorkerConfig::Static { output } => assert_eq!(output["network_status"], "ok"),
            other => panic!("unexpected worker: {:?}", other),
        }
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = AppConfig::parse("[engine\n").unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }
}
