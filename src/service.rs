//! Control service facade
//!
//! The operations the thin HTTP/RPC layer exposes: make a decision, execute
//! it, inspect a field's irrigation, stop it. This is also where decisions
//! are announced on the control-commands topic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::decision::DecisionEngine;
use crate::error::ControlError;
use crate::events::{topics, DomainEvent, EventPublisher};
use crate::fields::FieldConfigStore;
use crate::learning::Learner;
use crate::runner::{ActiveRegistry, IrrigationRunner};
use crate::store::{keys, read_json, KvCache};
use crate::types::{
    ControlAction, ControlDecision, FieldConfig, IrrigationConfig, IrrigationStatus,
    PlantingMethod, StopReason,
};

/// Result of executing a decision
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub schedule_id: Option<Uuid>,
    /// Which path ran: `start_irrigation`, `stop_irrigation`, `maintain`,
    /// or `notify`
    pub method: &'static str,
}

/// A field's irrigation state with a human recommendation
#[derive(Debug, Clone, Serialize)]
pub struct IrrigationStatusView {
    pub field_id: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IrrigationStatus>,
    pub recommendation: String,
}

/// Result of an external stop request
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub success: bool,
    pub schedule_id: Option<Uuid>,
}

/// Facade wiring the decision engine and runner together
pub struct ControlService {
    engine: DecisionEngine,
    runner: IrrigationRunner,
    fields: Arc<FieldConfigStore>,
    learner: Arc<Learner>,
    registry: Arc<ActiveRegistry>,
    cache: Arc<dyn KvCache>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ControlService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: DecisionEngine,
        runner: IrrigationRunner,
        fields: Arc<FieldConfigStore>,
        learner: Arc<Learner>,
        registry: Arc<ActiveRegistry>,
        cache: Arc<dyn KvCache>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            runner,
            fields,
            learner,
            registry,
            cache,
            publisher,
            clock,
        }
    }

    /// Register a field for AWD control
    pub async fn initialize_field(
        &self,
        field_id: &str,
        planting_method: PlantingMethod,
        start_date: DateTime<Utc>,
    ) -> Result<FieldConfig, ControlError> {
        self.fields
            .initialize(field_id, planting_method, start_date)
            .await
    }

    /// Evaluate a field and announce the outcome
    pub async fn make_control_decision(
        &self,
        field_id: &str,
    ) -> Result<ControlDecision, ControlError> {
        let decision = self.engine.decide(field_id).await?;

        info!(
            field_id,
            action = decision.action.name(),
            reason = %decision.reason,
            "Control decision made"
        );
        self.publisher.publish(DomainEvent::new(
            topics::AWD_CONTROL_COMMANDS,
            "control_decision",
            field_id,
            None,
            serde_json::to_value(&decision).unwrap_or_default(),
            self.clock.now(),
        ));

        Ok(decision)
    }

    /// Carry out a decision. Start decisions pick up the learner's
    /// recommended run parameters; maintain/notify are no-ops.
    pub async fn execute_irrigation(
        &self,
        field_id: &str,
        decision: &ControlDecision,
    ) -> Result<ExecutionOutcome, ControlError> {
        match &decision.action {
            ControlAction::StartIrrigation {
                target_level_cm, ..
            } => {
                let mut config = IrrigationConfig::for_field(field_id, *target_level_cm);
                match self.learner.optimal_parameters(field_id).await {
                    Ok(params) => {
                        config.tolerance_cm = params.tolerance_cm;
                        config.sensor_check_interval_sec = params.sensor_check_interval_sec;
                        config.max_duration_min = params.max_duration_min;
                        config.min_flow_rate_cm_per_min =
                            params.min_flow_rate_threshold_cm_per_min;
                    }
                    Err(e) => {
                        warn!(field_id, error = %e, "Using default run parameters");
                    }
                }

                let schedule_id = self.runner.start(config).await?;
                Ok(ExecutionOutcome {
                    success: true,
                    schedule_id: Some(schedule_id),
                    method: "start_irrigation",
                })
            }
            ControlAction::StopIrrigation { .. } => {
                let schedule_id = self
                    .runner
                    .stop(field_id, StopReason::ExternalCommand)
                    .await?;
                Ok(ExecutionOutcome {
                    success: true,
                    schedule_id,
                    method: "stop_irrigation",
                })
            }
            ControlAction::Maintain { .. } => Ok(ExecutionOutcome {
                success: true,
                schedule_id: None,
                method: "maintain",
            }),
            ControlAction::Notify { .. } => Ok(ExecutionOutcome {
                success: true,
                schedule_id: None,
                method: "notify",
            }),
        }
    }

    /// Live status plus what the engine would do next
    pub async fn irrigation_status(
        &self,
        field_id: &str,
    ) -> Result<IrrigationStatusView, ControlError> {
        if let Some(handle) = self.registry.get(field_id) {
            let status: Option<IrrigationStatus> = read_json(
                self.cache.as_ref(),
                &keys::irrigation_status(handle.schedule_id),
            )
            .await;
            let recommendation = match &status {
                Some(status) => format!(
                    "Irrigation in progress: {:.1}cm of {:.1}cm target",
                    status.current_level_cm, status.schedule.target_level_cm
                ),
                None => "Irrigation in progress".to_string(),
            };
            return Ok(IrrigationStatusView {
                field_id: field_id.to_string(),
                active: true,
                status,
                recommendation,
            });
        }

        let decision = self.engine.decide(field_id).await?;
        Ok(IrrigationStatusView {
            field_id: field_id.to_string(),
            active: false,
            status: None,
            recommendation: decision.reason,
        })
    }

    /// Stop a field's active run on an external request
    pub async fn stop_irrigation(
        &self,
        field_id: &str,
        reason: &str,
    ) -> Result<StopOutcome, ControlError> {
        info!(field_id, reason, "External stop requested");
        let schedule_id = self
            .runner
            .stop(field_id, StopReason::ExternalCommand)
            .await?;
        Ok(StopOutcome {
            success: schedule_id.is_some(),
            schedule_id,
        })
    }

    /// The learner's current view of a field: recommended run parameters
    /// and any recurring patterns
    pub async fn recommendations(
        &self,
        field_id: &str,
    ) -> Result<serde_json::Value, ControlError> {
        let parameters = self.learner.optimal_parameters(field_id).await?;
        let patterns = self.learner.patterns(field_id).await?;
        Ok(serde_json::json!({
            "field_id": field_id,
            "parameters": parameters,
            "patterns": patterns,
        }))
    }

    /// Active-run count for health reporting
    pub fn active_irrigations(&self) -> usize {
        self.registry.len()
    }

    /// Stop everything (process shutdown)
    pub async fn shutdown(&self) {
        self.runner.shutdown_all().await;
    }
}
