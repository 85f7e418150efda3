//! Workflow definitions and DAG validation.
//!
//! A workflow is an ordered list of stages whose `dependencies` induce a
//! directed graph. Registration requires that graph to be acyclic and fully
//! referenced; `Workflow::validate` checks both with Kahn's algorithm and
//! returns a deterministic topological order.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentRequirements;
use crate::error::{ConductorError, Result};
use crate::types::DataMap;

/// How often a stage may be retried after a transient failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
}

/// One unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "agent_requirements")]
    pub requirements: AgentRequirements,
    /// Declarative shape of the expected input; never enforced.
    #[serde(default)]
    pub input_schema: DataMap,
    /// Declarative shape of the produced output; never enforced.
    #[serde(default)]
    pub output_schema: DataMap,
    /// Upstream stage ids, in merge order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt timeout. `None` uses the engine default.
    #[serde(default, rename = "timeout_secs", with = "opt_secs")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl WorkflowStage {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            requirements: AgentRequirements::any(),
            input_schema: DataMap::new(),
            output_schema: DataMap::new(),
            dependencies: vec![],
            timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy.max_retries = max_retries;
        self
    }

    pub fn with_input_schema(mut self, schema: DataMap) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: DataMap) -> Self {
        self.output_schema = schema;
        self
    }
}

/// A named DAG of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stages: Vec<WorkflowStage>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, stages: Vec<WorkflowStage>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            stages,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn stage(&self, id: &str) -> Option<&WorkflowStage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Check the DAG invariant and return stage ids in topological order.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.id.trim().is_empty() {
            return Err(ConductorError::InvalidWorkflow("workflow id is empty".into()));
        }
        if self.stages.is_empty() {
            return Err(ConductorError::InvalidWorkflow(format!(
                "workflow '{}' has no stages",
                self.id
            )));
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.id.trim().is_empty() {
                return Err(ConductorError::InvalidWorkflow(format!(
                    "workflow '{}' has a stage with an empty id",
                    self.id
                )));
            }
            if index.insert(stage.id.as_str(), i).is_some() {
                return Err(ConductorError::InvalidWorkflow(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        let mut in_degree = vec![0usize; self.stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];

        for (i, stage) in self.stages.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &stage.dependencies {
                if *dep == stage.id {
                    return Err(ConductorError::InvalidWorkflow(format!(
                        "stage '{}' depends on itself",
                        stage.id
                    )));
                }
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(ConductorError::InvalidWorkflow(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.id, dep
                    )));
                };
                // Repeated dependency ids count once
                if seen.insert(d) {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.stages.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());

        while let Some(i) = queue.pop_front() {
            order.push(self.stages[i].id.clone());
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < self.stages.len() {
            let cyclic: Vec<&str> = self
                .stages
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, s)| s.id.as_str())
                .collect();
            return Err(ConductorError::InvalidWorkflow(format!(
                "dependency cycle among stages: {}",
                cyclic.join(", ")
            )));
        }

        Ok(order)
    }

    /// Every stage reachable from `stage_id` along dependency edges
    /// (stages that directly or indirectly depend on it).
    pub fn transitive_dependents(&self, stage_id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([stage_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for stage in &self.stages {
                if stage.dependencies.iter().any(|d| *d == current) && found.insert(stage.id.clone())
                {
                    queue.push_back(stage.id.clone());
                }
            }
        }
        found
    }
}

/// Serde helper: `Option<Duration>` as fractional seconds.
mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        secs.map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
