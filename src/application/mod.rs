pub mod correlator;
pub mod events;
pub mod station;
pub mod subscriptions;

pub use correlator::{Correlator, PendingCall, SharedCorrelator};
pub use events::{create_event_bus, Event, EventBus, EventMessage, EventSubscriber, SharedEventBus};
pub use station::{SharedStationCommands, SharedStatusBroadcasts, StationCommands, StatusBroadcasts};
pub use subscriptions::{
    MessageHandler, SharedSubscriptionRegistry, SubscriptionRegistry, SubscriptionToken,
};
