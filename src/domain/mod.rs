pub mod command;
pub mod correlation;
pub mod topic;

pub use command::{
    payload_from_value, CommandKind, Payload, StartCharging, StartChargingRequest, StationCommand,
};
pub use correlation::{CorrelationId, CorrelationIdGenerator, CORRELATION_FIELD};
pub use topic::{StationTopics, Topic};
