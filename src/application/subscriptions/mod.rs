pub mod registry;

pub use registry::{
    MessageHandler, SharedSubscriptionRegistry, SubscriptionRegistry, SubscriptionToken,
};
