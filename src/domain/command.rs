//! Station command catalogue
//!
//! Every command serializes to a flat JSON object whose `action` field names
//! the operation, e.g. `{"action":"set_power","power":11}`. The correlation
//! id is added later by the correlator.

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// JSON object sent to or received from a station.
pub type Payload = Map<String, Value>;

pub const DEFAULT_POWER_KW: f64 = 22.0;
pub const DEFAULT_CHARGER: &str = "AH-01";
pub const EMERGENCY_REASON: &str = "manual_emergency";

/// Largest magnitude below which every whole `f64` is an exact integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Whole kW values go on the wire as integers, `11` rather than `11.0`, so a
/// setpoint reaches the station in the form the caller wrote it.
fn serialize_power<S: Serializer>(power: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if power.fract() == 0.0 && power.abs() <= MAX_EXACT_INTEGER {
        serializer.serialize_i64(*power as i64)
    } else {
        serializer.serialize_f64(*power)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    StartCharging,
    StopCharging,
    GetStatus,
    Heartbeat,
    SetPower,
    EmergencyStop,
}

impl CommandKind {
    pub fn action(&self) -> &'static str {
        match self {
            Self::StartCharging => "start_charging",
            Self::StopCharging => "stop_charging",
            Self::GetStatus => "get_status",
            Self::Heartbeat => "heartbeat",
            Self::SetPower => "set_power",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action())
    }
}

/// Parameters of a start-charging request as supplied by a caller.
///
/// Anything not listed here is passed through to the station untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChargingRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub power: Option<f64>,
    pub charger: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl StartChargingRequest {
    /// Fill in defaults for every field the caller left out.
    pub fn resolve(self, default_power_kw: f64, default_charger: &str) -> StartCharging {
        let mut extra = self.extra;
        // Fixed fields win over passthrough duplicates.
        for key in ["action", "sessionId", "userId", "power", "charger"] {
            extra.remove(key);
        }

        StartCharging {
            session_id: self.session_id.unwrap_or_else(generate_session_id),
            user_id: self.user_id,
            power: self.power.unwrap_or(default_power_kw),
            charger: self
                .charger
                .unwrap_or_else(|| default_charger.to_string()),
            extra,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartCharging {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(serialize_with = "serialize_power")]
    pub power: f64,
    pub charger: String,
    #[serde(flatten)]
    pub extra: Payload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StationCommand {
    StartCharging(StartCharging),
    StopCharging {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    GetStatus,
    Heartbeat {
        timestamp: i64,
    },
    SetPower {
        #[serde(serialize_with = "serialize_power")]
        power: f64,
    },
    EmergencyStop {
        reason: String,
    },
}

impl StationCommand {
    pub fn heartbeat_now() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn emergency_stop() -> Self {
        Self::EmergencyStop {
            reason: EMERGENCY_REASON.to_string(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartCharging(_) => CommandKind::StartCharging,
            Self::StopCharging { .. } => CommandKind::StopCharging,
            Self::GetStatus => CommandKind::GetStatus,
            Self::Heartbeat { .. } => CommandKind::Heartbeat,
            Self::SetPower { .. } => CommandKind::SetPower,
            Self::EmergencyStop { .. } => CommandKind::EmergencyStop,
        }
    }

    pub fn into_payload(self) -> Result<Payload, serde_json::Error> {
        match serde_json::to_value(&self)? {
            Value::Object(map) => Ok(map),
            other => Ok(wrap_scalar(other)),
        }
    }
}

/// Turn an arbitrary caller value into a command payload.
///
/// Objects are used as-is; anything else travels as `{"message": value}`.
pub fn payload_from_value(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => wrap_scalar(other),
    }
}

fn wrap_scalar(value: Value) -> Payload {
    let mut map = Map::new();
    map.insert("message".to_string(), value);
    map
}

pub fn generate_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}
