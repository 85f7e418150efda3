use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info};

use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::session::{Session, SessionStatus, SessionType};
use conductor_core::types::{OrchestrationEvent, SessionId};

use crate::registry::AgentRegistry;

#[derive(Default)]
struct SessionState {
    sessions: HashMap<SessionId, Session>,
    /// Active-session count per agent id.
    active: HashMap<String, u32>,
}

/// Tracks collaboration sessions and enforces per-agent concurrency limits.
///
/// Creation validates and commits under a single lock, so two concurrent
/// requests can never both take an agent's last free slot.
pub struct SessionManager {
    registry: Arc<AgentRegistry>,
    state: Mutex<SessionState>,
    event_bus: Option<Arc<EventBus>>,
}

impl SessionManager {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(SessionState::default()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Open a new `Active` session.
    ///
    /// Fails with `UnknownAgent` for unregistered initiator or participants,
    /// `CollaborationRefused` if a participant does not collaborate or
    /// blacklists another participant, and `CapacityExceeded` if any
    /// participant is already at its `max_concurrent_sessions`.
    pub fn create_session<I, S>(
        &self,
        initiator_id: &str,
        participants: I,
        session_type: SessionType,
    ) -> Result<Session>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let participants: BTreeSet<String> = participants.into_iter().map(Into::into).collect();
        if participants.is_empty() {
            return Err(ConductorError::InvalidSession(
                "a session needs at least one participant".into(),
            ));
        }
        if session_type == SessionType::Pairwise && participants.len() != 2 {
            return Err(ConductorError::InvalidSession(format!(
                "pairwise session needs exactly 2 participants, got {}",
                participants.len()
            )));
        }
        if !self.registry.contains(initiator_id) {
            return Err(ConductorError::UnknownAgent(initiator_id.to_string()));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut records = Vec::with_capacity(participants.len());
        for id in &participants {
            let record = self
                .registry
                .get(id)
                .ok_or_else(|| ConductorError::UnknownAgent(id.clone()))?;
            records.push(record);
        }

        if participants.len() > 1 {
            for record in &records {
                if !record.can_collaborate {
                    return Err(ConductorError::CollaborationRefused {
                        agent: record.id.clone(),
                        reason: "agent does not collaborate".into(),
                    });
                }
                if let Some(blocked) = participants
                    .iter()
                    .find(|other| **other != record.id && record.blacklists(other))
                {
                    return Err(ConductorError::CollaborationRefused {
                        agent: record.id.clone(),
                        reason: format!("agent has blacklisted {}", blocked),
                    });
                }
            }
        }

        for record in &records {
            let limit = record.max_concurrent_sessions();
            let current = state.active.get(&record.id).copied().unwrap_or(0);
            if current >= limit {
                return Err(ConductorError::CapacityExceeded {
                    agent: record.id.clone(),
                    limit,
                });
            }
        }

        for id in &participants {
            *state.active.entry(id.clone()).or_insert(0) += 1;
        }

        let session = Session {
            id: SessionId::new(),
            initiator_id: initiator_id.to_string(),
            participants,
            session_type,
            created_at: Utc::now(),
            status: SessionStatus::Active,
            closed_at: None,
        };
        state.sessions.insert(session.id.clone(), session.clone());
        drop(state);

        info!(
            session_id = %session.id,
            initiator = %session.initiator_id,
            participants = session.participants.len(),
            "Session opened"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(OrchestrationEvent::SessionOpened {
                session_id: session.id.clone(),
                initiator_id: session.initiator_id.clone(),
                participants: session.participants.iter().cloned().collect(),
            });
        }
        Ok(session)
    }

    /// Close an active session and release its participants' slots.
    ///
    /// Unknown or already-closed sessions fail with `NotFound`; a repeated
    /// close never releases slots twice.
    pub fn close_session(&self, id: &SessionId) -> Result<Session> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let session = match state.sessions.get_mut(id) {
            Some(s) if s.is_active() => {
                s.status = SessionStatus::Closed;
                s.closed_at = Some(Utc::now());
                s.clone()
            }
            _ => return Err(ConductorError::NotFound(format!("active session {}", id))),
        };

        for agent in &session.participants {
            if let Some(count) = state.active.get_mut(agent) {
                *count = count.saturating_sub(1);
            }
        }
        drop(state);

        debug!(session_id = %id, "Session closed");
        if let Some(bus) = &self.event_bus {
            bus.publish(OrchestrationEvent::SessionClosed {
                session_id: id.clone(),
            });
        }
        Ok(session)
    }

    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(id)
            .cloned()
    }

    /// Active sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Number of active sessions `agent_id` participates in.
    pub fn active_count(&self, agent_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }
}
