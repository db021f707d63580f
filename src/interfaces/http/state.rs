//! State shared by the HTTP handlers

use std::sync::Arc;
use std::time::Instant;

use crate::application::{SharedStationCommands, SharedStatusBroadcasts, SharedSubscriptionRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub commands: SharedStationCommands,
    pub status: SharedStatusBroadcasts,
    pub subscriptions: SharedSubscriptionRegistry,
    pub started_at: Arc<Instant>,
}

impl ApiState {
    pub fn new(
        commands: SharedStationCommands,
        status: SharedStatusBroadcasts,
        subscriptions: SharedSubscriptionRegistry,
    ) -> Self {
        Self {
            commands,
            status,
            subscriptions,
            started_at: Arc::new(Instant::now()),
        }
    }
}
