//! Station command API handlers
//!
//! Correlated commands answer 200 with the station's reply or 500 with the
//! failure, both in the [`StationResponse`] envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{info, warn};

use super::dto::{
    PublishCommandBody, PublishedCommand, SetPowerBody, StartChargingBody, StatusSubscription,
    StopChargingBody,
};
use crate::domain::StationTopics;
use crate::interfaces::http::common::{ApiResponse, StationResponse, ValidatedJson};
use crate::interfaces::http::state::ApiState;

pub async fn start_charging(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    ValidatedJson(body): ValidatedJson<StartChargingBody>,
) -> StationResponse {
    let result = state
        .commands
        .start_charging(&station_id, body.into())
        .await;
    StationResponse::from_result(station_id, result)
}

pub async fn stop_charging(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    ValidatedJson(body): ValidatedJson<StopChargingBody>,
) -> StationResponse {
    let result = state
        .commands
        .stop_charging(&station_id, &body.session_id)
        .await;
    StationResponse::from_result(station_id, result)
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> StationResponse {
    let result = state.commands.get_status(&station_id).await;
    StationResponse::from_result(station_id, result)
}

pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> StationResponse {
    let result = state.commands.send_heartbeat(&station_id).await;
    StationResponse::from_result(station_id, result)
}

pub async fn set_power(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    ValidatedJson(body): ValidatedJson<SetPowerBody>,
) -> StationResponse {
    let result = state.commands.set_power(&station_id, body.power).await;
    StationResponse::from_result(station_id, result)
}

pub async fn emergency_stop(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> StationResponse {
    let result = state.commands.emergency_stop(&station_id).await;
    StationResponse::from_result(station_id, result)
}

pub async fn publish_command(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
    ValidatedJson(body): ValidatedJson<PublishCommandBody>,
) -> (StatusCode, Json<ApiResponse<PublishedCommand>>) {
    match state
        .commands
        .publish_command(&station_id, &body.action, body.data)
        .await
    {
        Ok(()) => {
            let topic = StationTopics::for_station(&station_id).request.to_string();
            (
                StatusCode::OK,
                Json(ApiResponse::success(PublishedCommand {
                    station_id,
                    action: body.action,
                    topic,
                })),
            )
        }
        Err(e) => {
            warn!(station_id, action = body.action.as_str(), error = %e, "Publish failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

// ─── Status feed ───────────────────────────────────────────────────

pub async fn watch_status(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<StatusSubscription>>) {
    let topic = StationTopics::for_station(&station_id).status.to_string();
    match state.status.forward_to_events(&station_id).await {
        Ok(()) => {
            info!(station_id, "Status feed enabled");
            (
                StatusCode::OK,
                Json(ApiResponse::success(StatusSubscription {
                    station_id,
                    topic,
                    active: true,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

pub async fn unwatch_status(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<StatusSubscription>>) {
    let topic = StationTopics::for_station(&station_id).status.to_string();
    match state.status.stop_forwarding(&station_id).await {
        Ok(()) => {
            info!(station_id, "Status feed disabled");
            (
                StatusCode::OK,
                Json(ApiResponse::success(StatusSubscription {
                    station_id,
                    topic,
                    active: false,
                })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}
