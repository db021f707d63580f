//! Topic naming for station conversations
//!
//! ```text
//! APP/{stationId}          backend ──► controller   (commands)
//! MCU/{stationId}          controller ──► backend   (command replies)
//! MCU/{stationId}/status   controller ──► backend   (push status)
//! ```

use std::fmt;

const APP_ROLE: &str = "APP";
const MCU_ROLE: &str = "MCU";
const STATUS_SUFFIX: &str = "status";

/// Opaque broker topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic(String);

impl Topic {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three topics belonging to one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationTopics {
    pub station_id: String,
    /// Outbound commands.
    pub request: Topic,
    /// Replies to commands. Shared by every command sent to the station.
    pub response: Topic,
    /// Unsolicited status broadcasts.
    pub status: Topic,
}

impl StationTopics {
    pub fn for_station(station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            request: Topic(format!("{}/{}", APP_ROLE, station_id)),
            response: Topic(format!("{}/{}", MCU_ROLE, station_id)),
            status: Topic(format!("{}/{}/{}", MCU_ROLE, station_id, STATUS_SUFFIX)),
        }
    }

    /// Station id addressed by a command topic (`APP/{id}`).
    pub fn station_of_request_topic(topic: &str) -> Option<&str> {
        let id = topic.strip_prefix(APP_ROLE)?.strip_prefix('/')?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_topics() {
        let topics = StationTopics::for_station("42");
        assert_eq!(topics.request.as_str(), "APP/42");
        assert_eq!(topics.response.as_str(), "MCU/42");
        assert_eq!(topics.status.as_str(), "MCU/42/status");
    }

    #[test]
    fn test_station_of_request_topic() {
        assert_eq!(StationTopics::station_of_request_topic("APP/42"), Some("42"));
        assert_eq!(StationTopics::station_of_request_topic("MCU/42"), None);
        assert_eq!(StationTopics::station_of_request_topic("APP/42/extra"), None);
        assert_eq!(StationTopics::station_of_request_topic("APP/"), None);
    }
}
