//! In-memory loopback transport for development and testing
//!
//! Behaves like a broker with a single client. Publishes are fanned out to
//! observers and the most recent ones are kept in a bounded log. Broker-level
//! subscriptions are tracked, and [`InMemoryTransport::inject`] plays the
//! role of a remote controller publishing on a topic.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{InboundMessage, InboundSink, Transport};
use crate::domain::{StationTopics, CORRELATION_FIELD};
use crate::support::{ShutdownSignal, TransportError};

const OUTBOX_CAPACITY: usize = 256;
/// Publishes kept for inspection; older ones are discarded.
const PUBLISH_LOG_CAPACITY: usize = 1024;

pub struct InMemoryTransport {
    connected: AtomicBool,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    published: Mutex<VecDeque<InboundMessage>>,
    log_capacity: usize,
    subscriptions: Mutex<HashSet<String>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    outbox: broadcast::Sender<InboundMessage>,
    sink: RwLock<Option<Arc<dyn InboundSink>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_log_capacity(PUBLISH_LOG_CAPACITY)
    }

    /// Keep at most `capacity` publishes in [`published`](Self::published).
    pub fn with_log_capacity(capacity: usize) -> Self {
        let (outbox, _) = broadcast::channel(OUTBOX_CAPACITY);
        Self {
            connected: AtomicBool::new(true),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            published: Mutex::new(VecDeque::new()),
            log_capacity: capacity,
            subscriptions: Mutex::new(HashSet::new()),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            outbox,
            sink: RwLock::new(None),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Route injected messages to `sink` (normally the subscription registry).
    pub fn attach(&self, sink: Arc<dyn InboundSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Observe every message published through this transport.
    pub fn outbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.outbox.subscribe()
    }

    /// The most recent publishes, oldest first.
    pub fn published(&self) -> Vec<InboundMessage> {
        self.published
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<InboundMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|subs| subs.contains(topic))
            .unwrap_or(false)
    }

    /// Number of broker-level subscribe calls that succeeded.
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Deliver a message as if a remote client had published it.
    ///
    /// Returns `false` when nothing is subscribed to `topic`, in which case a
    /// real broker would not forward the message either.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        if !self.is_subscribed(topic) {
            debug!(topic, "Injected message dropped, no broker subscription");
            return false;
        }
        let sink = self.sink.read().ok().and_then(|slot| slot.clone());
        match sink {
            Some(sink) => {
                sink.on_message(InboundMessage::new(topic, payload));
                true
            }
            None => false,
        }
    }

    pub fn inject_json(&self, topic: &str, value: &Value) -> bool {
        self.inject(topic, value.to_string().into_bytes())
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let message = InboundMessage::new(topic, payload);
        if let Ok(mut log) = self.published.lock() {
            if log.len() >= self.log_capacity {
                log.pop_front();
            }
            if self.log_capacity > 0 {
                log.push_back(message.clone());
            }
        }
        let _ = self.outbox.send(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.insert(topic.to_string());
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_connected()?;
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(topic);
        }
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Simulated station controllers.
///
/// Answers every command published on `APP/{id}` with a reply on `MCU/{id}`
/// that echoes the correlation id and action, after `delay`.
pub struct SimulatedStations {
    transport: Arc<InMemoryTransport>,
    delay: Duration,
}

impl SimulatedStations {
    pub fn new(transport: Arc<InMemoryTransport>, delay: Duration) -> Self {
        Self { transport, delay }
    }

    pub fn reply_for(station_id: &str, command: &Value) -> Value {
        json!({
            CORRELATION_FIELD: command.get(CORRELATION_FIELD).cloned().unwrap_or(Value::Null),
            "action": command.get("action").cloned().unwrap_or(Value::Null),
            "stationId": station_id,
            "status": "ok",
        })
    }

    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let mut outbound = self.transport.outbound();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.wait() => break,
                    received = outbound.recv() => match received {
                        Ok(message) => message,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Simulated stations lagged behind");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let Some(station_id) = StationTopics::station_of_request_topic(&message.topic) else {
                    continue;
                };
                let Ok(command) = message.parse_json() else {
                    continue;
                };
                if command.get(CORRELATION_FIELD).is_none() {
                    continue;
                }

                let reply = Self::reply_for(station_id, &command);
                let response_topic = StationTopics::for_station(station_id).response;
                let transport = self.transport.clone();
                let delay = self.delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    transport.inject_json(response_topic.as_str(), &reply);
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<InboundMessage>>);

    impl InboundSink for Collect {
        fn on_message(&self, message: InboundMessage) {
            self.0.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn test_inject_requires_broker_subscription() {
        let transport = InMemoryTransport::new();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        transport.attach(sink.clone());

        assert!(!transport.inject("MCU/1", b"x".to_vec()));
        transport.subscribe("MCU/1").await.unwrap();
        assert!(transport.inject("MCU/1", b"x".to_vec()));
        transport.unsubscribe("MCU/1").await.unwrap();
        assert!(!transport.inject("MCU/1", b"y".to_vec()));

        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(transport.subscribe_calls(), 1);
        assert_eq!(transport.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_transport_rejects_calls() {
        let transport = InMemoryTransport::new();
        transport.set_connected(false);
        assert_eq!(
            transport.publish("APP/1", Vec::new()).await.unwrap_err(),
            TransportError::NotConnected
        );
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_log_keeps_only_recent_messages() {
        let transport = InMemoryTransport::with_log_capacity(3);
        let mut outbound = transport.outbound();

        for i in 0..10 {
            transport
                .publish("APP/1", format!("{}", i).into_bytes())
                .await
                .unwrap();
        }

        let kept: Vec<Vec<u8>> = transport
            .published()
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(kept, vec![b"7".to_vec(), b"8".to_vec(), b"9".to_vec()]);
        assert_eq!(outbound.recv().await.unwrap().payload, b"0".to_vec());
    }

    #[tokio::test]
    async fn test_simulated_station_replies() {
        let transport = InMemoryTransport::shared();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        transport.attach(sink.clone());
        transport.subscribe("MCU/9").await.unwrap();

        let shutdown = ShutdownSignal::new();
        let task = SimulatedStations::new(transport.clone(), Duration::from_millis(5))
            .spawn(shutdown.clone());
        tokio::task::yield_now().await;

        transport
            .publish(
                "APP/9",
                br#"{"action":"get_status","requestId":"abc-1"}"#.to_vec(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        task.await.unwrap();

        let received = sink.0.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        let reply = received[0].parse_json().unwrap();
        assert_eq!(reply["requestId"], json!("abc-1"));
        assert_eq!(reply["action"], json!("get_status"));
        assert_eq!(reply["stationId"], json!("9"));
    }
}
