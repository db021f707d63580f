//! Bridge server runtime
//!
//! [`ServerHandle`] wires the whole stack together and owns its lifecycle:
//!
//! ```text
//!  MqttTransport / InMemoryTransport
//!        │ inbound                       ▲ publish/subscribe
//!        ▼                               │
//!  SubscriptionRegistry ◄── Correlator ◄── StationCommands ◄── REST API
//!        │                                                       │
//!        └──► StatusBroadcasts ──► EventBus ──► /ws/status ◄─────┘
//! ```
//!
//! The CLI binary uses it to run the bridge until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::{
    create_event_bus, Correlator, SharedCorrelator, SharedStationCommands,
    SharedStatusBroadcasts, SharedSubscriptionRegistry, StationCommands, StatusBroadcasts,
    SubscriptionRegistry,
};
use crate::config::AppConfig;
use crate::infrastructure::{
    InMemoryTransport, InboundSink, MqttTransport, SimulatedStations, Transport,
};
use crate::infrastructure::mqtt::SharedMqttTransport;
use crate::interfaces::http::{create_api_router, ApiState};
use crate::support::shutdown::{listen_for_shutdown_signals, run_with_deadline};
use crate::support::ShutdownSignal;

// ── Options ────────────────────────────────────────────────────────

/// Where station traffic goes.
#[derive(Debug, Clone)]
pub enum TransportMode {
    /// Real broker from `[mqtt]`.
    Mqtt,
    /// In-process loopback with simulated stations answering every command
    /// after `reply_delay`. For local development without a broker.
    Simulated { reply_delay: Duration },
}

pub struct ServerOptions {
    pub config: AppConfig,
    pub transport: TransportMode,
    /// Install the global Prometheus recorder and expose `/metrics`.
    pub metrics: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            transport: TransportMode::Mqtt,
            metrics: true,
        }
    }
}

/// The global recorder can only be installed once per process; a restarted
/// server reuses it.
fn prometheus_handle() -> Option<PrometheusHandle> {
    static PROM_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

    PROM_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
                None
            }
        })
        .clone()
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running bridge.
pub struct ServerHandle {
    pub commands: SharedStationCommands,
    pub status: SharedStatusBroadcasts,
    pub subscriptions: SharedSubscriptionRegistry,
    pub correlator: SharedCorrelator,
    /// The configuration the server was started with.
    pub config: AppConfig,
    /// Address the REST API is bound to.
    pub api_addr: SocketAddr,

    shutdown: ShutdownSignal,
    mqtt: Option<SharedMqttTransport>,
    api_task: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub async fn start(opts: ServerOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = opts.config;
        config.apply_env_overrides();

        info!("Starting charging bridge...");

        let prometheus = if opts.metrics { prometheus_handle() } else { None };
        let shutdown = ShutdownSignal::new();
        let mut background = Vec::new();

        // ── Transport ──────────────────────────────────────────
        let (transport, subscriptions, mqtt): (
            Arc<dyn Transport>,
            SharedSubscriptionRegistry,
            Option<SharedMqttTransport>,
        ) = match opts.transport {
            TransportMode::Mqtt => {
                let (mqtt, eventloop) = MqttTransport::connect(&config.mqtt);
                let subscriptions = SubscriptionRegistry::shared(mqtt.clone());
                let sink: Arc<dyn InboundSink> = subscriptions.clone();
                background.push(tokio::spawn(eventloop.run(sink, shutdown.clone())));
                let transport: Arc<dyn Transport> = mqtt.clone();
                (transport, subscriptions, Some(mqtt))
            }
            TransportMode::Simulated { reply_delay } => {
                warn!("Running with simulated stations, no broker traffic");
                let loopback = InMemoryTransport::shared();
                let subscriptions = SubscriptionRegistry::shared(loopback.clone());
                loopback.attach(subscriptions.clone());
                background.push(
                    SimulatedStations::new(loopback.clone(), reply_delay).spawn(shutdown.clone()),
                );
                let transport: Arc<dyn Transport> = loopback;
                (transport, subscriptions, None)
            }
        };

        // ── Application layer ──────────────────────────────────
        let correlator = Correlator::shared(transport.clone(), subscriptions.clone());
        let commands = Arc::new(StationCommands::new(
            correlator.clone(),
            transport,
            config.commands.clone(),
        ));
        let status = Arc::new(StatusBroadcasts::new(
            subscriptions.clone(),
            create_event_bus(),
        ));

        // ── REST API ───────────────────────────────────────────
        let router = create_api_router(
            ApiState::new(commands.clone(), status.clone(), subscriptions.clone()),
            prometheus,
        );

        let listener = tokio::net::TcpListener::bind(config.server.api_address()).await?;
        let api_addr = listener.local_addr()?;
        info!("REST API listening on http://{}", api_addr);

        let api_shutdown = shutdown.clone();
        let api_task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                api_shutdown.wait().await;
                info!("REST API received shutdown signal");
            });
            if let Err(e) = server.await {
                error!(error = %e, "REST API server error");
            }
        });

        Ok(Self {
            commands,
            status,
            subscriptions,
            correlator,
            config,
            api_addr,
            shutdown,
            mqtt,
            api_task,
            background,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Trigger shutdown on SIGTERM / SIGINT.
    pub fn install_signal_handler(&self) {
        tokio::spawn(listen_for_shutdown_signals(self.shutdown.clone()));
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for every task to stop after shutdown has been triggered.
    pub async fn wait(self) {
        match self.api_task.await {
            Ok(()) => info!("REST API stopped"),
            Err(e) => error!(error = %e, "REST API task panicked"),
        }

        if let Some(mqtt) = &self.mqtt {
            mqtt.disconnect().await;
        }

        let background = self.background;
        run_with_deadline(self.config.server.shutdown_timeout, async move {
            for task in background {
                if let Err(e) = task.await {
                    error!(error = %e, "Background task panicked");
                }
            }
        })
        .await;

        info!("Charging bridge stopped");
    }

    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.api_task.is_finished()
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.api_host = "127.0.0.1".to_string();
        config.server.api_port = 0;
        config.server.shutdown_timeout = 2;
        config
    }

    #[tokio::test]
    async fn test_simulated_server_round_trip_and_shutdown() {
        let handle = ServerHandle::start(ServerOptions {
            config: local_config(),
            transport: TransportMode::Simulated {
                reply_delay: Duration::from_millis(5),
            },
            metrics: false,
        })
        .await
        .unwrap();

        assert!(handle.is_running());
        assert_ne!(handle.api_addr.port(), 0);

        let reply = handle.commands.set_power("S-1", 7.0).await.unwrap();
        assert_eq!(reply["action"], json!("set_power"));
        assert_eq!(reply["stationId"], json!("S-1"));
        assert_eq!(handle.correlator.pending_count(), 0);
        assert_eq!(handle.subscriptions.count(), 0);

        handle.status.forward_to_events("S-1").await.unwrap();
        assert!(handle.status.is_watching("S-1"));

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mqtt_mode_without_broker_fails_commands() {
        let mut config = local_config();
        config.mqtt.port = 1;
        config.mqtt.reconnect_delay_ms = 50;

        let handle = ServerHandle::start(ServerOptions {
            config,
            transport: TransportMode::Mqtt,
            metrics: false,
        })
        .await
        .unwrap();

        let err = handle.commands.get_status("1").await.unwrap_err();
        assert_eq!(err.kind(), "transport_error");
        assert!(!handle.commands.is_connected());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
