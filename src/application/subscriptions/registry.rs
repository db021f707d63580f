//! Subscription registry: topic → handler routing for inbound messages
//!
//! Holds at most one handler per topic. The first subscriber of a topic
//! causes a broker-level subscribe; later subscribers replace the handler in
//! place (the previous handler stops receiving immediately). Broker-level
//! operations are serialized through `broker_ops` so that a subscribe and an
//! unsubscribe for the same topic can never reach the broker out of order.
//! Dispatch only reads the handler map and never waits on broker I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::infrastructure::{InboundMessage, InboundSink, Transport};
use crate::support::TransportError;

/// Callback invoked for every message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Identifies one particular registration of a handler.
///
/// Used by [`SubscriptionRegistry::release`] so that a caller only tears down
/// the subscription if nobody has replaced its handler in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    token: SubscriptionToken,
    handler: MessageHandler,
    subscribed_at: DateTime<Utc>,
}

pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    handlers: DashMap<String, Subscription>,
    broker_ops: Mutex<()>,
    next_token: AtomicU64,
}

pub type SharedSubscriptionRegistry = Arc<SubscriptionRegistry>;

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: DashMap::new(),
            broker_ops: Mutex::new(()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn shared(transport: Arc<dyn Transport>) -> SharedSubscriptionRegistry {
        Arc::new(Self::new(transport))
    }

    /// Route messages on `topic` to `handler`.
    ///
    /// The handler is recorded only once the broker accepted the subscribe.
    /// If the topic is already active its handler is replaced without any
    /// broker traffic.
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionToken, TransportError> {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let _ops = self.broker_ops.lock().await;

        if let Some(mut existing) = self.handlers.get_mut(topic) {
            existing.token = token;
            existing.handler = handler;
            debug!(topic, "Replaced handler on active subscription");
            return Ok(token);
        }

        if let Err(e) = self.transport.subscribe(topic).await {
            warn!(topic, error = %e, "Broker subscribe failed");
            return Err(e);
        }

        self.handlers.insert(
            topic.to_string(),
            Subscription {
                token,
                handler,
                subscribed_at: Utc::now(),
            },
        );
        Ok(token)
    }

    /// Drop the handler for `topic` and unsubscribe at the broker.
    ///
    /// The handler is removed even if the broker call fails.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let _ops = self.broker_ops.lock().await;

        match self.handlers.remove(topic) {
            Some((_, subscription)) => {
                let held_secs = Utc::now()
                    .signed_duration_since(subscription.subscribed_at)
                    .num_seconds();
                debug!(topic, held_secs, "Removed subscription handler");
            }
            None => debug!(topic, "Unsubscribe for topic without handler"),
        }

        self.transport.unsubscribe(topic).await.map_err(|e| {
            warn!(topic, error = %e, "Broker unsubscribe failed");
            e
        })
    }

    /// Like [`unsubscribe`](Self::unsubscribe), but only if `token` still
    /// owns the topic. Returns whether anything was released.
    pub async fn release(&self, topic: &str, token: SubscriptionToken) -> bool {
        let _ops = self.broker_ops.lock().await;

        if self
            .handlers
            .remove_if(topic, |_, subscription| subscription.token == token)
            .is_none()
        {
            debug!(topic, "Subscription owned by a newer handler, leaving it");
            return false;
        }

        if let Err(e) = self.transport.unsubscribe(topic).await {
            warn!(topic, error = %e, "Broker unsubscribe failed");
        }
        true
    }

    /// Deliver `message` to the handler of its topic, if any.
    pub fn dispatch(&self, message: InboundMessage) {
        let handler = self
            .handlers
            .get(&message.topic)
            .map(|subscription| subscription.handler.clone());

        match handler {
            Some(handler) => handler(message),
            None => info!(topic = message.topic.as_str(), "No handler for topic, message dropped"),
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    pub fn topics(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl InboundSink for SubscriptionRegistry {
    fn on_message(&self, message: InboundMessage) {
        self.dispatch(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryTransport;
    use std::sync::Mutex as StdMutex;

    fn setup() -> (Arc<InMemoryTransport>, SharedSubscriptionRegistry) {
        let transport = InMemoryTransport::shared();
        let registry = SubscriptionRegistry::shared(transport.clone());
        transport.attach(registry.clone());
        (transport, registry)
    }

    fn recorder() -> (MessageHandler, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
            sink.lock().unwrap().push(message.text());
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn test_second_subscribe_replaces_handler() {
        let (transport, registry) = setup();
        let (h1, seen1) = recorder();
        let (h2, seen2) = recorder();

        registry.subscribe("MCU/42/status", h1).await.unwrap();
        registry.subscribe("MCU/42/status", h2).await.unwrap();

        assert_eq!(transport.subscribe_calls(), 1);
        assert!(transport.inject("MCU/42/status", b"charging".to_vec()));

        assert!(seen1.lock().unwrap().is_empty());
        assert_eq!(*seen2.lock().unwrap(), vec!["charging".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_subscribe_records_nothing() {
        let (transport, registry) = setup();
        transport.fail_subscribes(true);
        let (handler, _) = recorder();

        let err = registry.subscribe("MCU/1", handler).await.unwrap_err();
        assert!(matches!(err, TransportError::Subscribe { .. }));
        assert!(!registry.is_subscribed("MCU/1"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handler_even_on_failure() {
        let (transport, registry) = setup();
        let (handler, _) = recorder();
        registry.subscribe("MCU/1", handler).await.unwrap();

        transport.set_connected(false);
        let err = registry.unsubscribe("MCU/1").await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert!(!registry.is_subscribed("MCU/1"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (transport, registry) = setup();
        let (handler, seen) = recorder();
        registry.subscribe("MCU/1", handler).await.unwrap();

        assert!(transport.inject("MCU/1", b"one".to_vec()));
        registry.unsubscribe("MCU/1").await.unwrap();
        assert!(!transport.inject("MCU/1", b"two".to_vec()));

        // Even a stray message reaching dispatch is dropped.
        registry.dispatch(InboundMessage::new("MCU/1", b"three".to_vec()));
        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
    }

    #[tokio::test]
    async fn test_release_with_stale_token_keeps_newer_subscription() {
        let (transport, registry) = setup();
        let (h1, _) = recorder();
        let (h2, seen2) = recorder();

        let old = registry.subscribe("MCU/7", h1).await.unwrap();
        let new = registry.subscribe("MCU/7", h2).await.unwrap();
        assert_ne!(old, new);

        assert!(!registry.release("MCU/7", old).await);
        assert!(registry.is_subscribed("MCU/7"));
        assert!(transport.inject("MCU/7", b"still here".to_vec()));
        assert_eq!(seen2.lock().unwrap().len(), 1);

        assert!(registry.release("MCU/7", new).await);
        assert!(!registry.is_subscribed("MCU/7"));
        assert!(!transport.is_subscribed("MCU/7"));
    }

    #[test]
    fn test_dispatch_unknown_topic_is_dropped() {
        let registry = SubscriptionRegistry::new(InMemoryTransport::shared());
        registry.dispatch(InboundMessage::new("nowhere", b"x".to_vec()));
        assert_eq!(registry.count(), 0);
    }
}
