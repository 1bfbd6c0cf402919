//! Workflow event bus.
//!
//! Bounded broadcast channel; events are published together with the state
//! transition that caused them. Slow subscribers lose the oldest events
//! rather than back-pressuring the workflow.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ContractUpserted {
        contract_id: String,
    },
    TaskPublished {
        task_id: String,
    },
    SubmissionReviewed {
        submission_id: String,
        status: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Publish an event; a bus with no subscribers swallows it.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::ContractUpserted {
            contract_id: "c1".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            WorkflowEvent::ContractUpserted {
                contract_id: "c1".to_string()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(WorkflowEvent::TaskPublished {
            task_id: "t1".to_string(),
        });
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = WorkflowEvent::SubmissionReviewed {
            submission_id: "SUB-1".to_string(),
            status: "accepted".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"submission_reviewed\""));
    }
}
