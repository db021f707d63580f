//! Shared response envelopes and extractors

pub mod validated_json;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::support::CommandError;

pub use validated_json::{ValidatedJson, ValidatedJsonRejection};

/// Generic wrapper for non-station endpoints:
/// `{"success": true, "data": {...}}` or `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome of a station command as returned to HTTP callers.
///
/// Success carries the station's reply under `response`, failure a message
/// under `error`. Exactly one of the two is present.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationResponse {
    pub success: bool,
    pub station_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StationResponse {
    pub fn ok(station_id: impl Into<String>, response: Value) -> Self {
        Self {
            success: true,
            station_id: station_id.into(),
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(station_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            station_id: station_id.into(),
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result(station_id: impl Into<String>, result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(reply) => Self::ok(station_id, reply),
            Err(e) => Self::failed(station_id, e.to_string()),
        }
    }
}

impl IntoResponse for StationResponse {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_station_response_shape() {
        let ok = serde_json::to_value(StationResponse::ok("42", json!({"status": "ok"}))).unwrap();
        assert_eq!(
            ok,
            json!({"success": true, "stationId": "42", "response": {"status": "ok"}})
        );

        let err = StationResponse::from_result(
            "42",
            Err(CommandError::Timeout {
                request_id: "r-1".to_string(),
                timeout_ms: 5000,
            }),
        );
        assert!(!err.success);
        let value = serde_json::to_value(&err).unwrap();
        assert!(value.get("response").is_none());
        assert!(value["error"].as_str().unwrap().contains("5000"));
    }

    #[test]
    fn test_station_response_status_codes() {
        let ok = StationResponse::ok("1", json!({})).into_response();
        assert_eq!(ok.status(), StatusCode::OK);
        let err = StationResponse::failed("1", "boom").into_response();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
