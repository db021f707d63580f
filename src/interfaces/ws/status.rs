//! WebSocket stream of forwarded station status events
//!
//! `GET /ws/status?station_id=42&event_types=station_status` upgrades to a
//! WebSocket that receives every matching [`EventMessage`] as a JSON text
//! frame. Only stations whose status feed was enabled through the REST API
//! produce events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::select;
use tracing::{debug, error, info, warn};

use crate::application::events::EventMessage;
use crate::interfaces::http::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusStreamQuery {
    pub station_id: Option<String>,
    /// Comma-separated event types; all types when absent.
    pub event_types: Option<String>,
}

impl StatusStreamQuery {
    pub fn wants(&self, event: &EventMessage) -> bool {
        match &self.event_types {
            Some(types) => types
                .split(',')
                .map(str::trim)
                .any(|t| t == event.event.event_type()),
            None => true,
        }
    }
}

pub async fn ws_status_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<StatusStreamQuery>,
) -> impl IntoResponse {
    info!(
        station_id = ?query.station_id,
        event_types = ?query.event_types,
        "Status stream requested"
    );
    ws.on_upgrade(move |socket| stream_status(socket, state, query))
}

async fn stream_status(socket: WebSocket, state: ApiState, query: StatusStreamQuery) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriber = state.status.events().subscribe(query.station_id.clone());

    let hello = json!({
        "type": "connected",
        "stationId": query.station_id,
        "eventTypes": query.event_types,
    });
    if let Err(e) = sender.send(Message::Text(hello.to_string().into())).await {
        error!(error = %e, "Failed to greet status client");
        return;
    }

    loop {
        select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Status stream socket error");
                    break;
                }
            },

            event = subscriber.recv() => {
                let Some(event) = event else {
                    warn!("Event bus closed");
                    break;
                };
                if !query.wants(&event) {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = sender.send(Message::Text(text.into())).await {
                            debug!(error = %e, "Status client went away");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to serialize event"),
                }
            }
        }
    }

    info!(station_id = ?query.station_id, "Status stream closed");
}
