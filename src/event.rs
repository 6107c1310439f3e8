use crate::constants::EVENT_BUS_CAPACITY;
use crate::core::DetailedStatus;
use serde::Serialize;
use tokio::sync::broadcast;

/// What happened to a task, published as a hint for observers to re-sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// A new interaction was appended to the log
    InteractionAppended { interaction_id: i64 },

    /// The detailed status of the task changed
    StatusChanged { detailed_status: DetailedStatus },

    /// A tool approval request was opened
    ApprovalRequested { request_id: String },

    /// A tool approval request was approved or rejected
    ApprovalResolved { request_id: String, approved: bool },

    /// The auto-mode flag was flipped
    AutoModeToggled { auto_mode: bool },
}

/// An event about a single task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Fire-and-forget publication of task events
///
/// Delivery is not guaranteed; observers converge through the interaction log.
pub trait Notifier: Send + Sync {
    fn publish(&self, task_id: &str, kind: EventKind);
}

/// In-process broadcast bus for task events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for EventBus {
    fn publish(&self, task_id: &str, kind: EventKind) {
        let _ = self.tx.send(TaskEvent {
            task_id: task_id.to_string(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish("t1", EventKind::AutoModeToggled { auto_mode: true });

        let mut rx = bus.subscribe();
        bus.publish("t1", EventKind::InteractionAppended { interaction_id: 1 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, "t1");
        assert_eq!(event.kind, EventKind::InteractionAppended { interaction_id: 1 });
    }

    #[test]
    fn test_event_wire_shape() {
        let event = TaskEvent {
            task_id: "t1".into(),
            kind: EventKind::StatusChanged {
                detailed_status: DetailedStatus::WaitingInput,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["detailed_status"], "waiting_input");
        assert_eq!(json["task_id"], "t1");
    }
}
