//! MQTT transport backed by `rumqttc`
//!
//! ```text
//!  callers ──► MqttTransport (AsyncClient, cloneable) ──► request channel
//!                                                              │
//!  InboundSink ◄── MqttEventLoop::run (single task) ◄── EventLoop::poll
//! ```
//!
//! The event loop task is the only place that touches the socket. It delivers
//! inbound publishes sequentially and keeps the connected flag current.
//! Reconnection is left to `rumqttc`: after an error the loop pauses and
//! polls again, which makes the client reconnect.
//!
//! `subscribe` returns once the SUBSCRIBE is queued, not when the broker
//! acknowledges it. A topic the broker refuses shows up as a failure code
//! in the SUBACK, which the event loop logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, SubAck,
    SubscribeReasonCode,
};
use tracing::{debug, error, info, trace, warn};

use super::transport::{InboundMessage, InboundSink, Transport};
use crate::config::MqttConfig;
use crate::support::{ShutdownSignal, TransportError};

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Number of topics in `ack` the broker refused.
fn refused_subscriptions(ack: &SubAck) -> usize {
    ack.return_codes
        .iter()
        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
        .count()
}

pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<AtomicBool>,
}

pub type SharedMqttTransport = Arc<MqttTransport>;

impl MqttTransport {
    /// Build the client handle and its event loop. Nothing touches the
    /// network until [`MqttEventLoop::run`] is polled.
    pub fn connect(config: &MqttConfig) -> (SharedMqttTransport, MqttEventLoop) {
        debug!(
            host = config.host.as_str(),
            port = config.port,
            client_id = config.client_id.as_str(),
            "Configuring MQTT broker connection"
        );

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(config.clean_session);
        if config.has_credentials() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(Self {
            client,
            qos: qos_from_level(config.qos),
            connected: connected.clone(),
        });
        let eventloop = MqttEventLoop {
            eventloop,
            connected,
            broker: format!("{}:{}", config.host, config.port),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        };

        (transport, eventloop)
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Failed to send MQTT disconnect");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let size = payload.len();
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(topic, size, "MQTT published");
        Ok(())
    }

    /// Queues the SUBSCRIBE. A refusal by the broker arrives later in the
    /// SUBACK and is only logged.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        info!(topic, "MQTT subscribe sent");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        info!(topic, "MQTT unsubscribed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Owns the socket side of the connection.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    broker: String,
    reconnect_delay: Duration,
}

impl MqttEventLoop {
    /// Drive the connection until `shutdown` fires.
    pub async fn run(mut self, sink: Arc<dyn InboundSink>, shutdown: ShutdownSignal) {
        info!(broker = self.broker.as_str(), "Starting MQTT event loop");

        loop {
            let event = tokio::select! {
                _ = shutdown.wait() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = publish.topic.as_str(), "MQTT received");
                    sink.on_message(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.connected.store(true, Ordering::SeqCst);
                        info!(broker = self.broker.as_str(), "Connected to MQTT broker");
                    } else {
                        self.connected.store(false, Ordering::SeqCst);
                        error!(code = ?ack.code, "MQTT broker refused connection");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => match refused_subscriptions(&ack) {
                    0 => debug!(pkid = ack.pkid, "MQTT subscription acknowledged"),
                    refused => error!(
                        pkid = ack.pkid,
                        refused,
                        "MQTT broker refused subscription, replies on that topic will not arrive"
                    ),
                },
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!("MQTT broker closed the session");
                }
                Ok(other) => {
                    trace!(event = ?other, "MQTT event");
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!(
                        error = %e,
                        "MQTT connection error, polling again in {:?}",
                        self.reconnect_delay
                    );
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("MQTT event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_refused_subscriptions_counted_from_suback() {
        let granted = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(refused_subscriptions(&granted), 0);

        let refused = SubAck::new(
            2,
            vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        assert_eq!(refused_subscriptions(&refused), 1);
    }

    #[tokio::test]
    async fn test_not_connected_before_connack() {
        let (transport, _eventloop) = MqttTransport::connect(&MqttConfig::default());
        assert!(!transport.is_connected());

        let err = transport
            .publish("APP/1", b"{}".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);

        let err = transport.subscribe("MCU/1").await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }
}
