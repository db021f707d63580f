//! Station command facade
//!
//! The single entry point for callers that want to talk to a charging
//! station. Each operation builds its command payload, picks the configured
//! timeout and runs it through the [`Correlator`](super::correlator::Correlator)
//! on `APP/{stationId}` → `MCU/{stationId}`.
//!
//! Calls to the same station are serialized here, since concurrent calls
//! sharing a response topic would steal each other's reply handler. Waiting
//! for the station counts against the operation's timeout.

pub mod status;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{info, warn};

use super::correlator::SharedCorrelator;
use crate::config::CommandConfig;
use crate::domain::{
    payload_from_value, Payload, StartChargingRequest, StationCommand, StationTopics,
};
use crate::infrastructure::mqtt::encode_payload;
use crate::infrastructure::Transport;
use crate::support::CommandError;

pub use status::{SharedStatusBroadcasts, StatusBroadcasts};

/// Record command latency and outcome to Prometheus.
fn record_command(action: &'static str, start: Instant, outcome: &'static str) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("station_command_latency_seconds", "action" => action).record(duration);
    metrics::counter!("station_commands_total", "action" => action, "outcome" => outcome)
        .increment(1);
}

pub struct StationCommands {
    correlator: SharedCorrelator,
    transport: Arc<dyn Transport>,
    config: CommandConfig,
    station_locks: DashMap<String, Arc<Mutex<()>>>,
}

pub type SharedStationCommands = Arc<StationCommands>;

impl StationCommands {
    pub fn new(
        correlator: SharedCorrelator,
        transport: Arc<dyn Transport>,
        config: CommandConfig,
    ) -> Self {
        Self {
            correlator,
            transport,
            config,
            station_locks: DashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    // ─── Correlated commands ───────────────────────────────────────────

    pub async fn start_charging(
        &self,
        station_id: &str,
        request: StartChargingRequest,
    ) -> Result<Value, CommandError> {
        let command = request.resolve(self.config.default_power_kw, &self.config.default_charger);
        info!(
            station_id,
            session_id = command.session_id.as_str(),
            power = command.power,
            "Start charging requested"
        );
        self.send(station_id, StationCommand::StartCharging(command))
            .await
    }

    pub async fn stop_charging(
        &self,
        station_id: &str,
        session_id: &str,
    ) -> Result<Value, CommandError> {
        self.send(
            station_id,
            StationCommand::StopCharging {
                session_id: session_id.to_string(),
            },
        )
        .await
    }

    pub async fn get_status(&self, station_id: &str) -> Result<Value, CommandError> {
        self.send(station_id, StationCommand::GetStatus).await
    }

    pub async fn send_heartbeat(&self, station_id: &str) -> Result<Value, CommandError> {
        self.send(station_id, StationCommand::heartbeat_now()).await
    }

    pub async fn set_power(&self, station_id: &str, power: f64) -> Result<Value, CommandError> {
        self.send(station_id, StationCommand::SetPower { power }).await
    }

    pub async fn emergency_stop(&self, station_id: &str) -> Result<Value, CommandError> {
        warn!(station_id, "Emergency stop requested");
        self.send(station_id, StationCommand::emergency_stop()).await
    }

    /// Run `command` against `station_id` and wait for the station's reply.
    pub async fn send(
        &self,
        station_id: &str,
        command: StationCommand,
    ) -> Result<Value, CommandError> {
        let kind = command.kind();
        let action = kind.action();
        let timeout = self.config.timeout_for(kind);
        let topics = StationTopics::for_station(station_id);
        let payload = command.into_payload()?;

        let start = Instant::now();
        let deadline = start + timeout;

        let result = match self.acquire_station(station_id, deadline).await {
            Some(_slot) => {
                self.correlator
                    .call_until(
                        topics.request.as_str(),
                        topics.response.as_str(),
                        payload,
                        deadline,
                        timeout,
                    )
                    .await
            }
            None => Err(CommandError::StationBusy {
                station_id: station_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => {
                record_command(action, start, "ok");
                info!(station_id, action, "Station replied");
            }
            Err(e) => {
                record_command(action, start, e.kind());
                warn!(station_id, action, error = %e, "Station command failed");
            }
        }
        result
    }

    // ─── Fire-and-forget ───────────────────────────────────────────────

    /// Publish `{action, ...data, timestamp}` on the station's request topic
    /// without waiting for a reply.
    ///
    /// Fields in `data` may override `action`; `timestamp` is always set here.
    pub async fn publish_command(
        &self,
        station_id: &str,
        action: &str,
        data: Value,
    ) -> Result<(), CommandError> {
        let topics = StationTopics::for_station(station_id);

        let mut payload = Payload::new();
        payload.insert("action".to_string(), Value::String(action.to_string()));
        if !data.is_null() {
            payload.extend(payload_from_value(data));
        }
        payload.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().timestamp_millis()),
        );

        let body = encode_payload(&Value::Object(payload))?;
        self.transport
            .publish(topics.request.as_str(), body)
            .await?;

        metrics::counter!("station_commands_total", "action" => "publish", "outcome" => "ok")
            .increment(1);
        info!(station_id, action, "Published station command");
        Ok(())
    }

    /// Wait until no other call is in flight for `station_id`, or give up
    /// at `deadline`.
    async fn acquire_station<'a>(
        &'a self,
        station_id: &'a str,
        deadline: Instant,
    ) -> Option<StationSlot<'a>> {
        // Declared first so it drops last, after the waiter's handle on the lock.
        let mut slot = StationSlot {
            locks: &self.station_locks,
            station_id,
            guard: None,
        };
        let lock = self
            .station_locks
            .entry(station_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        slot.guard = Some(tokio::time::timeout_at(deadline, lock.lock_owned()).await.ok()?);
        Some(slot)
    }
}

/// Exclusive use of a station's response topic. The lock entry is dropped
/// from the map once nobody holds or waits for it.
struct StationSlot<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    station_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StationSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(self.station_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
