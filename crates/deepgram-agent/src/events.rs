//! Events surfaced by an [`AgentConnection`](crate::AgentConnection).

use crate::protocol::FunctionCallRequest;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Everything a subscriber can observe about the session.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A binary frame from the agent, intended for playback. Never transformed.
    AudioResponse(Bytes),
    /// A generic control message, or text emitted by the conversation workflow.
    TextResponse(Value),
    /// The agent asked for a local function to be executed.
    FunctionCallRequest(FunctionCallRequest),
    /// Barge-in: interrupt playback immediately.
    StopAudio,
    /// A protocol or connection error. The offending frame has been dropped.
    Error(String),
    /// The current connection has closed.
    Closed,
}

impl AgentEvent {
    /// The event channel name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::AudioResponse(_) => "audioResponse",
            AgentEvent::TextResponse(_) => "textResponse",
            AgentEvent::FunctionCallRequest(_) => "functionCallRequest",
            AgentEvent::StopAudio => "stopAudio",
            AgentEvent::Error(_) => "error",
            AgentEvent::Closed => "close",
        }
    }
}

/// Fan-out of [`AgentEvent`]s to any number of independent subscribers.
///
/// Each subscriber gets its own unbounded queue, so a slow consumer never
/// causes another to miss events. Subscribers that have been dropped are
/// pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AgentEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: AgentEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<AgentEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(AgentEvent::StopAudio);
        bus.publish(AgentEvent::AudioResponse(Bytes::from_static(&[1, 2])));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap(), AgentEvent::StopAudio);
            assert_eq!(
                rx.try_recv().unwrap(),
                AgentEvent::AudioResponse(Bytes::from_static(&[1, 2]))
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(AgentEvent::Closed);

        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish(AgentEvent::Error("nobody listening".to_string()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(AgentEvent::StopAudio.name(), "stopAudio");
        assert_eq!(AgentEvent::Closed.name(), "close");
        assert_eq!(
            AgentEvent::TextResponse(Value::Null).name(),
            "textResponse"
        );
    }
}
