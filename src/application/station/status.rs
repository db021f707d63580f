//! Long-lived station status subscriptions
//!
//! Status broadcasts arrive on `MCU/{stationId}/status`. Unlike reply
//! subscriptions they stay until explicitly removed. A subscription either
//! calls a caller-supplied handler or forwards every message to the event bus
//! as [`Event::StationStatus`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::application::events::{Event, SharedEventBus, StationStatusEvent, StatusFeedEvent};
use crate::application::subscriptions::{
    MessageHandler, SharedSubscriptionRegistry, SubscriptionToken,
};
use crate::domain::StationTopics;
use crate::infrastructure::InboundMessage;
use crate::support::TransportError;

pub struct StatusBroadcasts {
    subscriptions: SharedSubscriptionRegistry,
    events: SharedEventBus,
}

pub type SharedStatusBroadcasts = Arc<StatusBroadcasts>;

impl StatusBroadcasts {
    pub fn new(subscriptions: SharedSubscriptionRegistry, events: SharedEventBus) -> Self {
        Self {
            subscriptions,
            events,
        }
    }

    /// Deliver every status message of `station_id` to `handler` until
    /// [`unsubscribe_from_status`](Self::unsubscribe_from_status) is called.
    ///
    /// A second subscription for the same station replaces the first handler.
    pub async fn subscribe_to_status(
        &self,
        station_id: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionToken, TransportError> {
        let topics = StationTopics::for_station(station_id);
        let token = self
            .subscriptions
            .subscribe(topics.status.as_str(), handler)
            .await?;
        info!(station_id, topic = topics.status.as_str(), "Watching station status");
        Ok(token)
    }

    pub async fn unsubscribe_from_status(&self, station_id: &str) -> Result<(), TransportError> {
        let topics = StationTopics::for_station(station_id);
        let result = self.subscriptions.unsubscribe(topics.status.as_str()).await;
        info!(station_id, topic = topics.status.as_str(), "Stopped watching station status");
        result
    }

    /// Subscribe with a handler that republishes status messages on the
    /// event bus.
    pub async fn forward_to_events(&self, station_id: &str) -> Result<(), TransportError> {
        let handler = forwarding_handler(self.events.clone(), station_id.to_string());
        self.subscribe_to_status(station_id, handler).await?;
        self.events
            .publish(Event::StatusFeedStarted(StatusFeedEvent::now(station_id)));
        Ok(())
    }

    pub async fn stop_forwarding(&self, station_id: &str) -> Result<(), TransportError> {
        self.unsubscribe_from_status(station_id).await?;
        self.events
            .publish(Event::StatusFeedStopped(StatusFeedEvent::now(station_id)));
        Ok(())
    }

    pub fn is_watching(&self, station_id: &str) -> bool {
        let topics = StationTopics::for_station(station_id);
        self.subscriptions.is_subscribed(topics.status.as_str())
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }
}

fn forwarding_handler(events: SharedEventBus, station_id: String) -> MessageHandler {
    Arc::new(move |message: InboundMessage| {
        let status = message
            .parse_json()
            .unwrap_or_else(|_| Value::String(message.text()));
        events.publish(Event::StationStatus(StationStatusEvent {
            station_id: station_id.clone(),
            topic: message.topic,
            status,
            received_at: Utc::now(),
        }));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::create_event_bus;
    use crate::application::subscriptions::SubscriptionRegistry;
    use crate::infrastructure::InMemoryTransport;
    use serde_json::json;
    use std::sync::Mutex;

    fn setup() -> (Arc<InMemoryTransport>, StatusBroadcasts) {
        let transport = InMemoryTransport::shared();
        let registry = SubscriptionRegistry::shared(transport.clone());
        transport.attach(registry.clone());
        (transport, StatusBroadcasts::new(registry, create_event_bus()))
    }

    #[tokio::test]
    async fn test_status_delivered_until_unsubscribed() {
        let (transport, status) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
            sink.lock().unwrap().push(message.text());
        });

        status.subscribe_to_status("42", handler).await.unwrap();
        assert!(status.is_watching("42"));
        assert!(transport.is_subscribed("MCU/42/status"));

        for text in ["idle", "charging", "done"] {
            assert!(transport.inject("MCU/42/status", text.as_bytes().to_vec()));
        }
        // Reply topic of the same station is not a status topic.
        assert!(!transport.inject("MCU/42", b"reply".to_vec()));

        status.unsubscribe_from_status("42").await.unwrap();
        assert!(!transport.inject("MCU/42/status", b"late".to_vec()));

        assert_eq!(*seen.lock().unwrap(), vec!["idle", "charging", "done"]);
        assert!(!status.is_watching("42"));
    }

    #[tokio::test]
    async fn test_forwarding_publishes_events() {
        let (transport, status) = setup();
        let mut subscriber = status.events().subscribe(Some("7".to_string()));

        status.forward_to_events("7").await.unwrap();
        transport.inject_json("MCU/7/status", &json!({"state": "charging", "kw": 11}));
        transport.inject("MCU/7/status", b"offline".to_vec());
        status.stop_forwarding("7").await.unwrap();

        let started = subscriber.recv().await.unwrap();
        assert_eq!(started.event.event_type(), "status_feed_started");

        match subscriber.recv().await.unwrap().event {
            Event::StationStatus(e) => {
                assert_eq!(e.topic, "MCU/7/status");
                assert_eq!(e.status["state"], json!("charging"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match subscriber.recv().await.unwrap().event {
            Event::StationStatus(e) => assert_eq!(e.status, json!("offline")),
            other => panic!("unexpected event {:?}", other),
        }

        let stopped = subscriber.recv().await.unwrap();
        assert_eq!(stopped.event.event_type(), "status_feed_stopped");
    }

    #[tokio::test]
    async fn test_failed_status_subscribe_is_reported() {
        let (transport, status) = setup();
        transport.fail_subscribes(true);
        let err = status.forward_to_events("1").await.unwrap_err();
        assert!(matches!(err, TransportError::Subscribe { .. }));
        assert!(!status.is_watching("1"));
    }
}
