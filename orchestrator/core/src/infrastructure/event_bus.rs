// Event Bus Implementation - Pub/Sub for Execution Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Enables real-time event streaming to SSE endpoints and observers.

use crate::domain::events::ExecutionEvent;
use crate::domain::execution::ExecutionId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to execution events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ExecutionEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before dropping
    /// old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an execution event to all subscribers
    pub fn publish(&self, event: ExecutionEvent) {
        debug!(execution_id = %event.execution_id(), "Publishing event");

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all execution events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a specific execution ID.
    /// Events from other executions in the tree are skipped.
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionEventReceiver {
        ExecutionEventReceiver {
            receiver: self.sender.subscribe(),
            execution_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all execution events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<ExecutionEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ExecutionEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for execution-specific events (filtered)
pub struct ExecutionEventReceiver {
    receiver: broadcast::Receiver<ExecutionEvent>,
    execution_id: ExecutionId,
}

impl ExecutionEventReceiver {
    /// Receive the next event for the subscribed execution ID
    pub async fn recv(&mut self) -> Result<ExecutionEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;

            if event.execution_id() == self.execution_id {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let execution_id = ExecutionId::new();
        event_bus.publish(ExecutionEvent::ExecutionStarted {
            execution_id,
            agent_key: "primary".to_string(),
            started_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        match received {
            ExecutionEvent::ExecutionStarted { execution_id: id, .. } => {
                assert_eq!(id, execution_id);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_execution_event_filtering() {
        let event_bus = EventBus::new(10);
        let execution_id = ExecutionId::new();
        let other_execution_id = ExecutionId::new();

        let mut receiver = event_bus.subscribe_execution(execution_id);

        // Event for a different execution (should be filtered out)
        event_bus.publish(ExecutionEvent::ExecutionStarted {
            execution_id: other_execution_id,
            agent_key: "other".to_string(),
            started_at: Utc::now(),
        });

        // Event for our execution (should be received)
        event_bus.publish(ExecutionEvent::ExecutionStarted {
            execution_id,
            agent_key: "primary".to_string(),
            started_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        match received {
            ExecutionEvent::ExecutionStarted { execution_id: id, .. } => {
                assert_eq!(id, execution_id);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(ExecutionEvent::MessageDelta {
            execution_id: ExecutionId::new(),
            content: "chunk".to_string(),
        });

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }
}
