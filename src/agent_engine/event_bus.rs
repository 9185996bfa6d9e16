use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Task lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Queued { id: Uuid, identifier: String },
    Started { id: Uuid, attempt: u32 },
    Succeeded { id: Uuid, elapsed_ms: u64 },
    Retrying { id: Uuid, retry: u32, delay_ms: u64, error: String },
    DeadLettered { id: Uuid, error: String },
}

/// Fan-out of [`TaskEvent`]s. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        bus.send(TaskEvent::DeadLettered {
            id: Uuid::nil(),
            error: "nobody listening".into(),
        });

        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.send(TaskEvent::Started { id, attempt: 1 });
        bus.send(TaskEvent::Succeeded { id, elapsed_ms: 5 });
        assert_eq!(rx.recv().await.unwrap(), TaskEvent::Started { id, attempt: 1 });
        assert!(matches!(rx.recv().await.unwrap(), TaskEvent::Succeeded { .. }));
    }
}
