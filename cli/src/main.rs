//! Charging bridge CLI server
//!
//! ```sh
//! # Default config (~/.config/charging-bridge/config.toml)
//! charging-bridge
//!
//! # Custom config and broker
//! charging-bridge --config /etc/charging-bridge/config.toml --mqtt-host broker.local
//!
//! # No broker: stations are simulated in-process
//! charging-bridge --simulate
//!
//! # Validate config without starting
//! charging-bridge --check
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use charging_bridge::config::AppConfig;
use charging_bridge::server::{init_tracing, ServerHandle, ServerOptions, TransportMode};

#[derive(Parser, Debug)]
#[command(
    name = "charging-bridge",
    version,
    about = "MQTT request/response bridge for EV charging stations",
    long_about = "Publishes station commands on APP/{id}, correlates replies on MCU/{id} \
                  and exposes the result over a REST API.\n\n\
                  Default config: ~/.config/charging-bridge/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the REST API listen port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the MQTT broker host.
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Override the MQTT broker port.
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Answer every command from simulated in-process stations instead of a broker.
    #[arg(long)]
    simulate: bool,

    /// Reply delay of simulated stations, in milliseconds.
    #[arg(long, default_value_t = 200)]
    simulate_delay_ms: u64,

    /// Skip the Prometheus recorder and `/metrics`.
    #[arg(long)]
    no_metrics: bool,

    /// Validate the configuration file and exit without starting.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Credentials may come from a local .env file.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    // ── Load configuration ────────────────────────────────────
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(charging_bridge::default_config_path);

    let mut config = if config_path.exists() {
        match AppConfig::load(&config_path) {
            Ok(cfg) => cfg,
            Err(e) if cli.check => {
                eprintln!("Invalid configuration {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
            Err(e) => {
                init_tracing(&AppConfig::default());
                error!("Failed to load config from {}: {}", config_path.display(), e);
                return Err(e.into());
            }
        }
    } else {
        AppConfig::default()
    };

    // ── CLI overrides ─────────────────────────────────────────
    if let Some(port) = cli.api_port {
        config.server.api_port = port;
    }
    if let Some(host) = &cli.mqtt_host {
        config.mqtt.host = host.clone();
    }
    if let Some(port) = cli.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // ── Config validation mode ────────────────────────────────
    if cli.check {
        println!("Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   API address : {}", config.server.api_address());
        println!("   MQTT broker : {}:{}", config.mqtt.host, config.mqtt.port);
        println!(
            "   MQTT auth   : {}",
            if config.mqtt.has_credentials() { "username/password" } else { "anonymous" }
        );
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    init_tracing(&config);
    if config_path.exists() {
        info!("Configuration loaded from {}", config_path.display());
    } else {
        warn!("No config at {}, using defaults", config_path.display());
    }
    if let Ok(path) = dotenv {
        info!("Environment loaded from {}", path.display());
    }

    let transport = if cli.simulate {
        TransportMode::Simulated {
            reply_delay: Duration::from_millis(cli.simulate_delay_ms),
        }
    } else {
        TransportMode::Mqtt
    };

    // ── Start server ──────────────────────────────────────────
    let handle = ServerHandle::start(ServerOptions {
        config,
        transport,
        metrics: !cli.no_metrics,
    })
    .await?;

    handle.install_signal_handler();
    info!("Press Ctrl+C to shut down gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}
