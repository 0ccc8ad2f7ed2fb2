//! SCADA gate actuator gateway
//!
//! Sends open/close/level commands to the canal-side actuator API, mirrors
//! every forwarded command into the local `scada_command_log`, and runs a
//! periodic monitor that completes open commands once the actuator reports
//! them done.
//!
//! Commands are idempotent on `(station_code, start_time)`: re-issuing a
//! command with the same key returns the original command id without hitting
//! the actuator again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hydraulic::HydraulicClient;
use crate::clock::Clock;
use crate::config::defaults::{
    COMMAND_MONITOR_INTERVAL_SECS, COMMAND_MONITOR_LOOKBACK_SECS, HTTP_TIMEOUT_SECS,
};
use crate::config::EndpointConfig;
use crate::error::ControlError;
use crate::events::{topics, DomainEvent, EventPublisher};
use crate::store::{FieldRepository, GateCommandLog};
use crate::types::{
    CommandState, GateCommand, GateCommandRecord, GateCommandStatus, GateLevel,
};

/// Gate operations the irrigation runner depends on
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Open the field's gate at a discrete level; returns the command id
    async fn open(&self, field_id: &str, level: GateLevel) -> Result<String, ControlError>;

    /// Open the field's gate sized for a target flow rate
    async fn open_for_flow(
        &self,
        field_id: &str,
        target_flow_rate_m3s: f64,
    ) -> Result<String, ControlError>;

    /// Command the gate closed (level 1)
    async fn close(&self, field_id: &str) -> Result<String, ControlError>;

    async fn command_status(
        &self,
        command_id: &str,
    ) -> Result<GateCommandStatus, ControlError>;
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Serialize)]
struct ScadaCommandRequest<'a> {
    station_code: &'a str,
    gate_level: u8,
    start_time: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_flow_rate_m3s: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ScadaStatusResponse {
    complete: bool,
    gate_level: u8,
    start_time: chrono::DateTime<chrono::Utc>,
}

// ============================================================================
// Actuator gateway
// ============================================================================

/// HTTP gateway to the external gate actuator
pub struct GateActuator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    fields: Arc<dyn FieldRepository>,
    log: Arc<dyn GateCommandLog>,
    hydraulic: HydraulicClient,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl GateActuator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scada: &EndpointConfig,
        hydraulic: HydraulicClient,
        fields: Arc<dyn FieldRepository>,
        log: Arc<dyn GateCommandLog>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: scada.base_url.trim_end_matches('/').to_string(),
            api_key: scada.api_key.clone(),
            fields,
            log,
            hydraulic,
            publisher,
            clock,
        }
    }

    /// Canal station controlling this field's branch
    pub async fn resolve_station(&self, field_id: &str) -> Result<String, ControlError> {
        self.fields
            .station_for(field_id)
            .await?
            .ok_or_else(|| ControlError::StationUnmapped(field_id.to_string()))
    }

    /// Forward a gate command, mirroring it into the local command log
    pub async fn send_gate_command(&self, command: GateCommand) -> Result<String, ControlError> {
        let command_id = command.command_id();

        // Idempotent on (station_code, start_time): a replay returns the
        // original id without re-commanding the gate
        if self.log.get(&command_id).await?.is_some() {
            debug!(command_id, "Gate command already issued, skipping");
            return Ok(command_id);
        }

        let record = GateCommandRecord {
            command_id: command_id.clone(),
            field_id: command.field_id.clone(),
            station_code: command.station_code.clone(),
            gate_level: command.gate_level.as_u8(),
            target_flow_rate_m3s: command.target_flow_rate_m3s,
            command_time: command.start_time,
            status: CommandState::Sent,
            completed_at: None,
        };
        self.log.record(&record).await?;

        let mut request = self
            .http
            .post(format!("{}/api/v1/commands", self.base_url))
            .json(&ScadaCommandRequest {
                station_code: &command.station_code,
                gate_level: command.gate_level.as_u8(),
                start_time: command.start_time,
                target_flow_rate_m3s: command.target_flow_rate_m3s,
            });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let send_result = async {
            request
                .send()
                .await
                .map_err(|e| ControlError::ActuatorUnreachable(e.to_string()))?
                .error_for_status()
                .map_err(|e| ControlError::ActuatorUnreachable(e.to_string()))
        }
        .await;

        if let Err(e) = send_result {
            let mut failed = record;
            failed.status = CommandState::Failed;
            if let Err(log_err) = self.log.record(&failed).await {
                warn!(command_id = %failed.command_id, error = %log_err, "Could not mark command failed");
            }
            return Err(e);
        }

        info!(
            command_id,
            station = %command.station_code,
            gate_level = command.gate_level.as_u8(),
            "Gate command sent"
        );
        self.publisher.publish(DomainEvent::new(
            topics::GATE_CONTROL_COMMANDS,
            "gate_command",
            &command.field_id,
            None,
            serde_json::json!({
                "command_id": command_id,
                "station_code": command.station_code,
                "gate_level": command.gate_level.as_u8(),
                "target_flow_rate_m3s": command.target_flow_rate_m3s,
            }),
            self.clock.now(),
        ));

        Ok(command_id)
    }
}

#[async_trait]
impl Actuator for GateActuator {
    async fn open(&self, field_id: &str, level: GateLevel) -> Result<String, ControlError> {
        let station_code = self.resolve_station(field_id).await?;
        self.send_gate_command(GateCommand {
            station_code,
            gate_level: level,
            start_time: self.clock.now(),
            field_id: field_id.to_string(),
            target_flow_rate_m3s: None,
        })
        .await
    }

    async fn open_for_flow(
        &self,
        field_id: &str,
        target_flow_rate_m3s: f64,
    ) -> Result<String, ControlError> {
        let station_code = self.resolve_station(field_id).await?;

        let gate_level = match self
            .hydraulic
            .gate_level_for_flow(&station_code, target_flow_rate_m3s)
            .await
        {
            Ok(level) => level,
            Err(e) => {
                // Hydraulic collaborator down is never fatal: use the flow table
                warn!(
                    field_id,
                    target_flow_rate_m3s,
                    error = %e,
                    "Hydraulic service unavailable, using fallback flow mapping"
                );
                GateLevel::from_flow_rate(target_flow_rate_m3s)
            }
        };

        self.send_gate_command(GateCommand {
            station_code,
            gate_level,
            start_time: self.clock.now(),
            field_id: field_id.to_string(),
            target_flow_rate_m3s: Some(target_flow_rate_m3s),
        })
        .await
    }

    async fn close(&self, field_id: &str) -> Result<String, ControlError> {
        self.open(field_id, GateLevel::Closed).await
    }

    async fn command_status(
        &self,
        command_id: &str,
    ) -> Result<GateCommandStatus, ControlError> {
        let mut request = self.http.get(format!(
            "{}/api/v1/commands/{command_id}/status",
            self.base_url
        ));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response: ScadaStatusResponse = request
            .send()
            .await
            .map_err(|e| ControlError::ActuatorUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControlError::ActuatorUnreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ControlError::ActuatorUnreachable(e.to_string()))?;

        Ok(GateCommandStatus {
            complete: response.complete,
            gate_level: response.gate_level,
            start_time: response.start_time,
        })
    }
}

// ============================================================================
// Command completion monitor
// ============================================================================

/// Periodic task reconciling the local command log with actuator state
///
/// Every 30 seconds it polls the actuator for commands still `sent` from the
/// last hour; completions are marked locally and announced on
/// `GATE_STATUS_UPDATES`.
pub struct CommandMonitor {
    actuator: Arc<dyn Actuator>,
    log: Arc<dyn GateCommandLog>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl CommandMonitor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        log: Arc<dyn GateCommandLog>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actuator,
            log,
            publisher,
            clock,
        }
    }

    /// Run the reconciliation loop until cancellation
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = COMMAND_MONITOR_INTERVAL_SECS,
            "Gate command monitor started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(COMMAND_MONITOR_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Gate command monitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.reconcile_once().await;
                }
            }
        }
    }

    async fn reconcile_once(&self) {
        let since = self.clock.now() - chrono::Duration::seconds(COMMAND_MONITOR_LOOKBACK_SECS);
        let open = match self.log.open_commands_since(since).await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Could not scan command log");
                return;
            }
        };

        for command in open {
            let status = match self.actuator.command_status(&command.command_id).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(command_id = %command.command_id, error = %e, "Status poll failed");
                    continue;
                }
            };
            if !status.complete {
                continue;
            }

            let now = self.clock.now();
            if let Err(e) = self.log.mark_completed(&command.command_id, now).await {
                warn!(command_id = %command.command_id, error = %e, "Could not mark command completed");
                continue;
            }
            debug!(command_id = %command.command_id, "Gate command completed");
            self.publisher.publish(DomainEvent::new(
                topics::GATE_STATUS_UPDATES,
                "gate_status_updated",
                &command.field_id,
                None,
                serde_json::json!({
                    "command_id": command.command_id,
                    "station_code": command.station_code,
                    "gate_level": status.gate_level,
                    "completed_at": now,
                }),
                now,
            ));
        }
    }
}
