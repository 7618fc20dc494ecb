//! A single in-process fan-out channel for [`AgentEvent`]s.
//!
//! Backed by `tokio::sync::broadcast`: any number of subscribers (a UI
//! renderer, the event collector, a test assertion) can independently drain
//! the stream without coordinating with each other or blocking the
//! publisher. A slow or absent subscriber never backs up
//! `AgentManager::send`; it only risks a `RecvError::Lagged` on its own
//! receiver.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::AgentEvent;

/// Number of events a lagging subscriber may fall behind before the
/// broadcast channel starts dropping the oldest ones for that subscriber.
/// Large enough to absorb a burst from a verbose agent turn without forcing
/// every collector to keep up in lockstep.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A cloneable handle onto the shared broadcast channel. Cloning shares the
/// same underlying channel; it does not create an independent bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Publish an event to every current subscriber. Returns the number of
    /// receivers it was delivered to (zero if nobody is listening yet).
    pub fn publish(&self, event: AgentEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Subscribe to future events. Events published before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AgentEventKind;
    use crate::model::Team;

    fn team() -> Arc<Team> {
        Arc::new(Team { id: Arc::from("t"), name: Arc::from("T"), members: Vec::new() })
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(AgentEvent::new(
            Arc::from("bob"),
            Arc::from("claude-code"),
            team(),
            AgentEventKind::SessionStarted,
        ));

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert!(matches!(got_a.kind, AgentEventKind::SessionStarted));
        assert!(matches!(got_b.kind, AgentEventKind::SessionStarted));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        let delivered = bus.publish(AgentEvent::new(
            Arc::from("bob"),
            Arc::from("claude-code"),
            team(),
            AgentEventKind::SessionStarted,
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_error_not_a_panic() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(AgentEvent::new(
                Arc::from("bob"),
                Arc::from("claude-code"),
                team(),
                AgentEventKind::SessionStarted,
            ));
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
