pub mod mqtt;

pub use mqtt::{
    InMemoryTransport, InboundMessage, InboundSink, MqttEventLoop, MqttTransport,
    SimulatedStations, Transport,
};
