//! Station API request bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::domain::{Payload, StartChargingRequest};

/// Upper bound accepted for a power setpoint, in kW.
pub const MAX_POWER_KW: f64 = 350.0;

/// `POST /stations/{id}/start`. All fields optional; unknown fields are
/// forwarded to the station.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartChargingBody {
    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    #[validate(range(exclusive_min = 0.0, max = 350.0))]
    pub power: Option<f64>,
    #[validate(length(min = 1, max = 64))]
    pub charger: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

impl From<StartChargingBody> for StartChargingRequest {
    fn from(body: StartChargingBody) -> Self {
        StartChargingRequest {
            session_id: body.session_id,
            user_id: body.user_id,
            power: body.power,
            charger: body.charger,
            extra: body.extra,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StopChargingBody {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetPowerBody {
    #[validate(range(exclusive_min = 0.0, max = 350.0))]
    pub power: f64,
}

/// `POST /stations/{id}/command`: fire-and-forget.
#[derive(Debug, Deserialize, Validate)]
pub struct PublishCommandBody {
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedCommand {
    pub station_id: String,
    pub action: String,
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSubscription {
    pub station_id: String,
    pub topic: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_body_keeps_passthrough_fields() {
        let body: StartChargingBody = serde_json::from_value(json!({
            "userId": "u-1",
            "connector": 2
        }))
        .unwrap();
        assert!(body.validate().is_ok());

        let request = StartChargingRequest::from(body);
        assert_eq!(request.user_id.as_deref(), Some("u-1"));
        assert_eq!(request.extra["connector"], json!(2));
        assert!(request.power.is_none());
    }

    #[test]
    fn test_power_limits() {
        assert!(SetPowerBody { power: MAX_POWER_KW }.validate().is_ok());
        assert!(SetPowerBody { power: 0.0 }.validate().is_err());
        assert!(SetPowerBody { power: -5.0 }.validate().is_err());
        assert!(SetPowerBody { power: 351.0 }.validate().is_err());

        let body = StartChargingBody {
            power: Some(400.0),
            ..Default::default()
        };
        assert!(body.validate().is_err());
    }
}
