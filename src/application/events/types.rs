//! Events forwarded to UI clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StationStatus(StationStatusEvent),
    StatusFeedStarted(StatusFeedEvent),
    StatusFeedStopped(StatusFeedEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StationStatus(_) => "station_status",
            Event::StatusFeedStarted(_) => "status_feed_started",
            Event::StatusFeedStopped(_) => "status_feed_stopped",
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            Event::StationStatus(e) => &e.station_id,
            Event::StatusFeedStarted(e) | Event::StatusFeedStopped(e) => &e.station_id,
        }
    }
}

/// A message a station broadcast on its status topic.
///
/// `status` holds the decoded JSON, or the raw text when the payload is not
/// JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatusEvent {
    pub station_id: String,
    pub topic: String,
    pub status: Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFeedEvent {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusFeedEvent {
    pub fn now(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
