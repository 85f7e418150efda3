use crate::types::OrchestrationEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrchestrationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(OrchestrationEvent::WorkflowRegistered {
            workflow_id: "wf".into(),
            stages: 2,
        });
        match rx.recv().await.unwrap() {
            OrchestrationEvent::WorkflowRegistered { workflow_id, stages } => {
                assert_eq!(workflow_id, "wf");
                assert_eq!(stages, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(OrchestrationEvent::WorkflowRegistered {
            workflow_id: "wf".into(),
            stages: 1,
        });
    }
}
