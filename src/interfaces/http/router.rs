//! API router

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::modules::metrics::{http_metrics_middleware, prometheus_metrics, MetricsState};
use super::modules::{health, stations};
use super::state::ApiState;
use crate::interfaces::ws::ws_status_handler;

/// Build the full HTTP surface. `/metrics` is only mounted when a Prometheus
/// recorder is available.
pub fn create_api_router(state: ApiState, prometheus: Option<PrometheusHandle>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let station_routes = Router::new()
        .route("/{id}/start", post(stations::start_charging))
        .route("/{id}/stop", post(stations::stop_charging))
        .route("/{id}/status", get(stations::get_status))
        .route("/{id}/heartbeat", post(stations::heartbeat))
        .route("/{id}/power", post(stations::set_power))
        .route("/{id}/emergency-stop", post(stations::emergency_stop))
        .route("/{id}/command", post(stations::publish_command))
        .route(
            "/{id}/status-subscription",
            post(stations::watch_status).delete(stations::unwatch_status),
        );

    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ws/status", get(ws_status_handler))
        .nest("/api/v1/stations", station_routes)
        .with_state(state);

    if let Some(handle) = prometheus {
        let metrics_routes = Router::new()
            .route("/metrics", get(prometheus_metrics))
            .with_state(MetricsState { handle });
        router = router.merge(metrics_routes);
    }

    router
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::application::{
        create_event_bus, Correlator, StationCommands, StatusBroadcasts, SubscriptionRegistry,
    };
    use crate::config::CommandConfig;
    use crate::infrastructure::{InMemoryTransport, SimulatedStations};
    use crate::support::ShutdownSignal;

    struct Harness {
        transport: Arc<InMemoryTransport>,
        router: Router,
        shutdown: ShutdownSignal,
    }

    fn harness(config: CommandConfig, with_stations: bool) -> Harness {
        let transport = InMemoryTransport::shared();
        let registry = SubscriptionRegistry::shared(transport.clone());
        transport.attach(registry.clone());
        let correlator = Correlator::shared(transport.clone(), registry.clone());
        let commands = Arc::new(StationCommands::new(correlator, transport.clone(), config));
        let status = Arc::new(StatusBroadcasts::new(registry.clone(), create_event_bus()));

        let shutdown = ShutdownSignal::new();
        if with_stations {
            SimulatedStations::new(transport.clone(), Duration::from_millis(5))
                .spawn(shutdown.clone());
        }

        let router = create_api_router(ApiState::new(commands, status, registry), None);
        Harness {
            transport,
            router,
            shutdown,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_get_status_success_envelope() {
        let h = harness(CommandConfig::default(), true);

        let (status, body) = send(&h.router, "GET", "/api/v1/stations/42/status", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["stationId"], json!("42"));
        assert_eq!(body["response"]["action"], json!("get_status"));
        assert!(body.get("error").is_none());
        h.shutdown.trigger();
    }

    #[tokio::test]
    async fn test_timeout_maps_to_500() {
        let config = CommandConfig {
            heartbeat_ms: 30,
            ..CommandConfig::default()
        };
        let h = harness(config, false);

        let (status, body) = send(&h.router, "POST", "/api/v1/stations/7/heartbeat", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["stationId"], json!("7"));
        assert!(body["error"].as_str().unwrap().contains("30 ms"));
        assert!(!h.transport.is_subscribed("MCU/7"));
    }

    #[tokio::test]
    async fn test_start_and_stop_bodies_reach_station() {
        let h = harness(CommandConfig::default(), true);

        let (status, _) = send(
            &h.router,
            "POST",
            "/api/v1/stations/5/start",
            Some(json!({"userId": "u-9", "power": 11, "connector": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &h.router,
            "POST",
            "/api/v1/stations/5/stop",
            Some(json!({"sessionId": "session_1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let sent = h.transport.published_to("APP/5");
        let start = sent[0].parse_json().unwrap();
        assert_eq!(start["action"], json!("start_charging"));
        assert_eq!(start["userId"], json!("u-9"));
        assert_eq!(start["power"], json!(11));
        assert_eq!(start["connector"], json!(1));
        let stop = sent[1].parse_json().unwrap();
        assert_eq!(stop["sessionId"], json!("session_1"));
        h.shutdown.trigger();
    }

    #[tokio::test]
    async fn test_invalid_power_rejected_before_publish() {
        let h = harness(CommandConfig::default(), false);

        let (status, body) = send(
            &h.router,
            "POST",
            "/api/v1/stations/5/power",
            Some(json!({"power": 0})),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], json!(false));
        assert!(h.transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_forget_command() {
        let h = harness(CommandConfig::default(), false);

        let (status, body) = send(
            &h.router,
            "POST",
            "/api/v1/stations/3/command",
            Some(json!({"action": "reboot", "data": {"delay": 5}})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["topic"], json!("APP/3"));
        let sent = h.transport.published_to("APP/3")[0].parse_json().unwrap();
        assert_eq!(sent["action"], json!("reboot"));
        assert_eq!(sent["delay"], json!(5));
    }

    #[tokio::test]
    async fn test_status_subscription_toggle() {
        let h = harness(CommandConfig::default(), false);
        let uri = "/api/v1/stations/8/status-subscription";

        let (status, body) = send(&h.router, "POST", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["topic"], json!("MCU/8/status"));
        assert!(h.transport.is_subscribed("MCU/8/status"));

        let (status, body) = send(&h.router, "DELETE", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active"], json!(false));
        assert!(!h.transport.is_subscribed("MCU/8/status"));
    }

    #[tokio::test]
    async fn test_health_reflects_broker_connection() {
        let h = harness(CommandConfig::default(), false);

        let (status, body) = send(&h.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broker"]["connected"], json!(true));
        assert_eq!(body["pending_requests"], json!(0));

        h.transport.set_connected(false);
        let (status, body) = send(&h.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], json!("degraded"));
    }

    #[tokio::test]
    async fn test_metrics_route_absent_without_recorder() {
        let h = harness(CommandConfig::default(), false);
        let (status, _) = send(&h.router, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
