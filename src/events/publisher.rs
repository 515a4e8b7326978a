use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::constants::events;
use crate::models::AttemptKey;
use crate::state_machine::Status;

/// High-throughput event publisher for attempt lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

/// One status transition of an attempt, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTransition {
    pub execution_id: i64,
    pub step_id: i64,
    pub retry_index: i32,
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
}

impl AttemptTransition {
    pub fn new(key: AttemptKey, from: Status, to: Status) -> Self {
        Self {
            execution_id: key.execution_id,
            step_id: key.step_id,
            retry_index: key.retry_index,
            from,
            to,
            at: Utc::now(),
        }
    }

    /// Event name under which this transition is published.
    pub fn event_name(&self) -> &'static str {
        match self.to {
            Status::NotStarted => events::ATTEMPT_CREATED,
            Status::Running => events::ATTEMPT_RUNNING,
            Status::AwaitingRetry | Status::Retry => events::ATTEMPT_RETRY_SCHEDULED,
            Status::Succeeded => events::ATTEMPT_SUCCEEDED,
            Status::Warning => events::ATTEMPT_WARNING,
            Status::Failed => events::ATTEMPT_FAILED,
            Status::Stopped => events::ATTEMPT_STOPPED,
            Status::Skipped => events::ATTEMPT_SKIPPED,
            Status::Duplicate => events::ATTEMPT_DUPLICATE,
        }
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: Utc::now(),
        };

        // A broadcast send only errors when nobody is subscribed, which is a
        // normal state for this publisher.
        match self.sender.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Publish a status transition under its lifecycle event name.
    pub async fn publish_transition(
        &self,
        transition: AttemptTransition,
    ) -> Result<(), PublishError> {
        let name = transition.event_name();
        let context = serde_json::to_value(&transition)?;
        self.publish(name, context).await
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        let transition =
            AttemptTransition::new(AttemptKey::first(1, 2), Status::NotStarted, Status::Running);
        assert!(publisher.publish_transition(transition).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_transitions() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();

        let transition =
            AttemptTransition::new(AttemptKey::first(9, 4), Status::Running, Status::Succeeded);
        publisher.publish_transition(transition).await.unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, events::ATTEMPT_SUCCEEDED);
        assert_eq!(event.context["execution_id"], 9);
        assert_eq!(event.context["step_id"], 4);
        assert_eq!(event.context["to"], "succeeded");
    }

    #[test]
    fn retry_bridge_states_share_the_retry_event() {
        let key = AttemptKey::first(1, 1);
        let scheduled = AttemptTransition::new(key, Status::Running, Status::Retry);
        assert_eq!(scheduled.event_name(), events::ATTEMPT_RETRY_SCHEDULED);

        let pending = AttemptTransition::new(key.successor(), Status::NotStarted, Status::AwaitingRetry);
        assert_eq!(pending.event_name(), events::ATTEMPT_RETRY_SCHEDULED);
    }
}
