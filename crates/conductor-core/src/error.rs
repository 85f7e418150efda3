use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    // Registration errors
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // Lookup misses
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Session errors
    #[error("Agent {agent} is at its session limit ({limit})")]
    CapacityExceeded { agent: String, limit: u32 },

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Agent {agent} refused collaboration: {reason}")]
    CollaborationRefused { agent: String, reason: String },

    // Stage-attempt errors
    #[error("No suitable agent for stage: {stage}")]
    NoSuitableAgent { stage: String },

    #[error("Policy denied stage {stage} for agent {agent}: {reason}")]
    PolicyDenied {
        agent: String,
        stage: String,
        reason: String,
    },

    #[error("Policy decision unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("Stage timeout after {timeout_ms}ms: {stage}")]
    Timeout { stage: String, timeout_ms: u64 },

    #[error("Worker failed: {agent}: {message}")]
    Worker { agent: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConductorError {
    /// Whether a failed stage attempt may be retried under its retry policy.
    ///
    /// A policy denial is never retryable; registry misses, timeouts, worker
    /// failures and an unreachable policy service are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableAgent { .. }
                | Self::Timeout { .. }
                | Self::Worker { .. }
                | Self::PolicyUnavailable(_)
        )
    }

    /// Stable snake_case kind, recorded in execution error summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow(_) => "invalid_workflow",
            Self::UnknownWorkflow(_) => "unknown_workflow",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::NotFound(_) => "not_found",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::InvalidSession(_) => "invalid_session",
            Self::CollaborationRefused { .. } => "collaboration_refused",
            Self::NoSuitableAgent { .. } => "no_suitable_agent",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::PolicyUnavailable(_) => "policy_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Worker { .. } => "worker_error",
            Self::Config(_) => "config",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::Gateway(_) => "gateway",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
