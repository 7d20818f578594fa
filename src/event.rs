//! Event-driven communication between daemon services.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::sample::LoopStatus;

/// Application events for inter-service communication.
///
/// Published through the [`EventBus`]; every subscriber sees every event
/// published after it subscribed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Outcome of the latest poll.
    StatusUpdated(LoopStatus),
    /// Configuration file was re-read and applied.
    ConfigReloaded,
    SystemShutdown,
}

/// Publish-subscribe bus shared by all services.
///
/// # Example
///
/// ```no_run
/// use jdtsd::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::SystemShutdown).ok();
///
/// // In async context:
/// // let event = subscriber.recv().await;
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
