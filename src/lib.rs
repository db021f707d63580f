//! # Charging Bridge
//!
//! Request/response bridge between an HTTP backend and EV charging-station
//! controllers that speak JSON over MQTT.
//!
//! A command for station `42` is published on `APP/42` with a unique
//! `requestId`; the controller answers on `MCU/42` echoing that id. Station
//! status broadcasts arrive on `MCU/42/status`.
//!
//! ## Layout
//!
//! - **domain**: topics, correlation ids, the station command catalogue
//! - **application**: subscription registry, correlator, station facade,
//!   status feed and event bus
//! - **infrastructure**: MQTT transport (`rumqttc`) and an in-memory loopback
//! - **interfaces**: REST API and the status WebSocket
//! - **server**: wiring and lifecycle

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig};
pub use server::{init_tracing, ServerHandle, ServerOptions, TransportMode};
pub use support::{CommandError, ConfigError, TransportError};
