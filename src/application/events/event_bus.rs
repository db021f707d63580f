//! Event bus for forwarding station events to UI subscribers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{Event, EventMessage};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: Event) {
        let message = EventMessage::new(event);
        let event_type = message.event.event_type();
        let station_id = message.event.station_id().to_string();

        match self.sender.send(message) {
            Ok(count) => debug!(event_type, station_id, subscribers = count, "Event published"),
            Err(_) => debug!(event_type, station_id, "Event published (no subscribers)"),
        }
    }

    /// Receive every event, or only those of `station_id` when given.
    pub fn subscribe(&self, station_id: Option<String>) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        let total = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total, station_id = ?station_id, "New event subscriber");

        EventSubscriber {
            receiver,
            station_id,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
    station_id: Option<String>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    /// Next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => {
                    if let Some(wanted) = &self.station_id {
                        if msg.event.station_id() != wanted {
                            continue;
                        }
                    }
                    return Some(msg);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "Subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        info!(remaining = prev.saturating_sub(1), "Event subscriber disconnected");
    }
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::StatusFeedEvent;

    #[tokio::test]
    async fn test_station_filter() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(None);
        let mut only_b = bus.subscribe(Some("B".to_string()));
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Event::StatusFeedStarted(StatusFeedEvent::now("A")));
        bus.publish(Event::StatusFeedStarted(StatusFeedEvent::now("B")));

        assert_eq!(all.recv().await.unwrap().event.station_id(), "A");
        assert_eq!(all.recv().await.unwrap().event.station_id(), "B");
        assert_eq!(only_b.recv().await.unwrap().event.station_id(), "B");

        drop(only_b);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::new();
        let mut subscriber = bus.subscribe(None);
        drop(bus);
        assert!(subscriber.recv().await.is_none());
    }
}
