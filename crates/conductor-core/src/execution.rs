use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConductorError;
use crate::types::{DataMap, ExecutionId};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of the most recent failure recorded for a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl StageError {
    pub fn from_error(err: &ConductorError, agent_id: Option<String>) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            agent_id,
        }
    }

    pub fn skipped(cause: &str) -> Self {
        Self {
            kind: "skipped".to_string(),
            message: format!("upstream stage '{}' did not succeed", cause),
            agent_id: None,
        }
    }
}

/// One running instance of a registered workflow.
///
/// Snapshots of this record are what status queries return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub input_data: DataMap,
    pub stage_status: BTreeMap<String, StageStatus>,
    /// Outputs of succeeded stages only.
    pub stage_results: BTreeMap<String, DataMap>,
    /// Retries spent per stage.
    pub stage_attempts: BTreeMap<String, u32>,
    pub stage_errors: BTreeMap<String, StageError>,
    /// Agent that produced each succeeded stage's output.
    pub stage_agents: BTreeMap<String, String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// A fresh execution with every stage `Pending`.
    pub fn new(workflow: &Workflow, input_data: DataMap) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id: workflow.id.clone(),
            input_data,
            stage_status: workflow
                .stages
                .iter()
                .map(|s| (s.id.clone(), StageStatus::Pending))
                .collect(),
            stage_results: BTreeMap::new(),
            stage_attempts: workflow.stages.iter().map(|s| (s.id.clone(), 0)).collect(),
            stage_errors: BTreeMap::new(),
            stage_agents: BTreeMap::new(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn status_of(&self, stage_id: &str) -> Option<StageStatus> {
        self.stage_status.get(stage_id).copied()
    }

    pub fn stages_with(&self, status: StageStatus) -> Vec<&str> {
        self.stage_status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
