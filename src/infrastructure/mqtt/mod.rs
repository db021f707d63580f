//! Broker transport adapters
//!
//! - [`MqttTransport`] / [`MqttEventLoop`]: the production connection (`rumqttc`).
//! - [`InMemoryTransport`]: loopback used by tests and `--simulate` mode.

pub mod client;
pub mod memory;
pub mod transport;

pub use client::{MqttEventLoop, MqttTransport, SharedMqttTransport};
pub use memory::{InMemoryTransport, SimulatedStations};
pub use transport::{encode_payload, InboundMessage, InboundSink, Transport};
