use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conductor_core::config::AuditConfig;
use conductor_core::event::EventBus;
use conductor_core::policy::EXECUTE_STAGE;
use conductor_core::types::OrchestrationEvent;

/// JSONL audit trail.
///
/// Subscribes to the EventBus and appends one JSON object per line. Every
/// policy evaluation is recorded with the request and the raw decision.
pub struct AuditLogger {
    path: PathBuf,
    to_stdout: bool,
}

/// A single line of the audit log.
#[derive(Debug, Serialize)]
struct AuditEntry {
    timestamp: String,
    event_type: String,
    agent_id: Option<String>,
    action: String,
    details: serde_json::Value,
}

impl AuditLogger {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            to_stdout: config.to_stdout,
        }
    }

    /// Subscribe now and write entries on a background task until `cancel`
    /// fires or the bus is dropped.
    ///
    /// Subscribing happens before this returns, so events published after
    /// the call are never missed.
    pub fn start(self, event_bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, cancel))
    }

    async fn run(self, mut rx: Receiver<OrchestrationEvent>, cancel: CancellationToken) {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(error = %e, "Failed to create audit log directory");
                return;
            }
        }

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "Failed to open audit log");
                return;
            }
        };

        info!(path = %self.path.display(), "Audit logger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Audit logger cancelled");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => event_to_entry(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Audit logger lagged, events missing from audit log");
                        entry("events_dropped", None, "audit", serde_json::json!({ "skipped": n }))
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, audit logger stopping");
                        break;
                    }
                },
            };

            let Ok(json) = serde_json::to_string(&record) else {
                continue;
            };
            if self.to_stdout {
                println!("[AUDIT] {}", json);
            }
            let line = format!("{}\n", json);
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                error!(error = %e, "Failed to write audit entry");
                break;
            }
            if let Err(e) = writer.flush().await {
                error!(error = %e, "Failed to flush audit log");
            }
        }

        writer.flush().await.ok();
        debug!(path = %self.path.display(), "Audit logger finished");
    }
}

fn entry(
    event_type: &str,
    agent_id: Option<&str>,
    action: &str,
    details: serde_json::Value,
) -> AuditEntry {
    AuditEntry {
        timestamp: Utc::now().to_rfc3339(),
        event_type: event_type.to_string(),
        agent_id: agent_id.map(str::to_string),
        action: action.to_string(),
        details,
    }
}

fn event_to_entry(event: &OrchestrationEvent) -> AuditEntry {
    use serde_json::json;

    match event {
        OrchestrationEvent::WorkflowRegistered { workflow_id, stages } => entry(
            "workflow_registered",
            None,
            "register_workflow",
            json!({ "workflow_id": workflow_id, "stages": stages }),
        ),
        OrchestrationEvent::ExecutionStarted {
            execution_id,
            workflow_id,
        } => entry(
            "execution_started",
            None,
            "execute_workflow",
            json!({ "execution_id": execution_id, "workflow_id": workflow_id }),
        ),
        OrchestrationEvent::StageStarted {
            execution_id,
            stage_id,
            attempt,
        } => entry(
            "stage_started",
            None,
            EXECUTE_STAGE,
            json!({ "execution_id": execution_id, "stage_id": stage_id, "attempt": attempt }),
        ),
        OrchestrationEvent::AgentSelected {
            execution_id,
            stage_id,
            agent_id,
        } => entry(
            "agent_selected",
            Some(agent_id),
            "select_agent",
            json!({ "execution_id": execution_id, "stage_id": stage_id }),
        ),
        OrchestrationEvent::PolicyEvaluated {
            execution_id,
            stage_id,
            agent_id,
            action,
            allow,
            decision,
        } => entry(
            "policy_decision",
            Some(agent_id),
            action,
            json!({
                "execution_id": execution_id,
                "request": {
                    "agent_id": agent_id,
                    "action": action,
                    "resource": stage_id,
                },
                "allow": allow,
                "decision": decision,
            }),
        ),
        OrchestrationEvent::StageSucceeded {
            execution_id,
            stage_id,
            agent_id,
            elapsed_ms,
        } => entry(
            "stage_succeeded",
            agent_id.as_deref(),
            EXECUTE_STAGE,
            json!({ "execution_id": execution_id, "stage_id": stage_id, "elapsed_ms": elapsed_ms }),
        ),
        OrchestrationEvent::StageRetrying {
            execution_id,
            stage_id,
            attempt,
            error,
        } => entry(
            "stage_retrying",
            None,
            EXECUTE_STAGE,
            json!({
                "execution_id": execution_id,
                "stage_id": stage_id,
                "attempt": attempt,
                "error": error,
            }),
        ),
        OrchestrationEvent::StageFailed {
            execution_id,
            stage_id,
            kind,
            error,
        } => entry(
            "stage_failed",
            None,
            EXECUTE_STAGE,
            json!({
                "execution_id": execution_id,
                "stage_id": stage_id,
                "kind": kind,
                "error": error,
            }),
        ),
        OrchestrationEvent::StageSkipped {
            execution_id,
            stage_id,
            cause,
        } => entry(
            "stage_skipped",
            None,
            EXECUTE_STAGE,
            json!({ "execution_id": execution_id, "stage_id": stage_id, "cause": cause }),
        ),
        OrchestrationEvent::ExecutionFinished {
            execution_id,
            workflow_id,
            status,
            elapsed_ms,
        } => entry(
            "execution_finished",
            None,
            "execute_workflow",
            json!({
                "execution_id": execution_id,
                "workflow_id": workflow_id,
                "status": status,
                "elapsed_ms": elapsed_ms,
            }),
        ),
        OrchestrationEvent::SessionOpened {
            session_id,
            initiator_id,
            participants,
        } => entry(
            "session_opened",
            Some(initiator_id),
            "create_session",
            json!({ "session_id": session_id, "participants": participants }),
        ),
        OrchestrationEvent::SessionClosed { session_id } => entry(
            "session_closed",
            None,
            "close_session",
            json!({ "session_id": session_id }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::types::ExecutionId;

    #[test]
    fn policy_decision_entry_carries_request_and_decision() {
        let event = OrchestrationEvent::PolicyEvaluated {
            execution_id: ExecutionId::from_string("exec-1"),
            stage_id: "triage".into(),
            agent_id: "triage_agent".into(),
            action: EXECUTE_STAGE.into(),
            allow: false,
            decision: serde_json::json!({"allow": false, "reason": "denied by default"}),
        };
        let entry = event_to_entry(&event);
        assert_eq!(entry.event_type, "policy_decision");
        assert_eq!(entry.agent_id.as_deref(), Some("triage_agent"));
        assert_eq!(entry.action, "execute_stage");
        assert_eq!(entry.details["request"]["resource"], "triage");
        assert_eq!(entry.details["decision"]["reason"], "denied by default");
    }

    #[tokio::test]
    async fn writes_jsonl_until_bus_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.log");
        let config = AuditConfig {
            enabled: true,
            path: path.to_string_lossy().into_owned(),
            to_stdout: false,
        };

        let bus = EventBus::default();
        let handle = AuditLogger::new(&config).start(&bus, CancellationToken::new());
        bus.publish(OrchestrationEvent::WorkflowRegistered {
            workflow_id: "wf".into(),
            stages: 2,
        });
        bus.publish(OrchestrationEvent::AgentSelected {
            execution_id: ExecutionId::from_string("exec-1"),
            stage_id: "triage".into(),
            agent_id: "triage_agent".into(),
        });
        drop(bus);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "workflow_registered");
        assert!(lines[0]["agent_id"].is_null());
        assert_eq!(lines[1]["agent_id"], "triage_agent");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            enabled: true,
            path: dir.path().join("audit.log").to_string_lossy().into_owned(),
            to_stdout: false,
        };
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = AuditLogger::new(&config).start(&bus, cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn lag_is_recorded_and_logging_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = AuditConfig {
            enabled: true,
            path: path.to_string_lossy().into_owned(),
            to_stdout: false,
        };

        let bus = EventBus::new(2);
        let handle = AuditLogger::new(&config).start(&bus, CancellationToken::new());
        for i in 0..5 {
            bus.publish(OrchestrationEvent::WorkflowRegistered {
                workflow_id: format!("wf{}", i),
                stages: 1,
            });
        }
        drop(bus);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event_type"], "events_dropped");
        assert_eq!(lines[0]["details"]["skipped"], 3);
        assert_eq!(lines[1]["details"]["workflow_id"], "wf3");
        assert_eq!(lines[2]["details"]["workflow_id"], "wf4");
    }
}
