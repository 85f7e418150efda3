use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::execution::ExecutionStatus;
use crate::workflow::WorkflowStage;

/// Flat key/value mapping exchanged with workers.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique collaboration session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a stage executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub stage: WorkflowStage,
    /// Execution input with every dependency's output merged on top.
    pub input: DataMap,
    /// Retries already spent on this stage (0 on the first attempt).
    pub attempt: u32,
    /// Agents that already failed this stage during this execution.
    pub failed_agents: Vec<String>,
}

/// What one stage attempt produced.
#[derive(Debug)]
pub struct AttemptOutcome {
    /// The agent selected for the attempt, if selection got that far.
    pub agent_id: Option<String>,
    pub result: Result<DataMap>,
}

impl AttemptOutcome {
    pub fn success(agent_id: impl Into<String>, output: DataMap) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            result: Ok(output),
        }
    }

    pub fn failure(agent_id: Option<String>, error: crate::error::ConductorError) -> Self {
        Self {
            agent_id,
            result: Err(error),
        }
    }
}

/// Events emitted during orchestration.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    WorkflowRegistered {
        workflow_id: String,
        stages: usize,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: String,
    },
    StageStarted {
        execution_id: ExecutionId,
        stage_id: String,
        attempt: u32,
    },
    AgentSelected {
        execution_id: ExecutionId,
        stage_id: String,
        agent_id: String,
    },
    PolicyEvaluated {
        execution_id: ExecutionId,
        stage_id: String,
        agent_id: String,
        action: String,
        allow: bool,
        decision: serde_json::Value,
    },
    StageSucceeded {
        execution_id: ExecutionId,
        stage_id: String,
        agent_id: Option<String>,
        elapsed_ms: u64,
    },
    StageRetrying {
        execution_id: ExecutionId,
        stage_id: String,
        attempt: u32,
        error: String,
    },
    StageFailed {
        execution_id: ExecutionId,
        stage_id: String,
        kind: String,
        error: String,
    },
    StageSkipped {
        execution_id: ExecutionId,
        stage_id: String,
        cause: String,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        workflow_id: String,
        status: ExecutionStatus,
        elapsed_ms: u64,
    },
    SessionOpened {
        session_id: SessionId,
        initiator_id: String,
        participants: Vec<String>,
    },
    SessionClosed {
        session_id: SessionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ExecutionId::from_string("exec-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"exec-1\"");
        assert_eq!(id.to_string(), "exec-1");
    }
}
