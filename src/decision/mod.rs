//! Decision engine
//!
//! Per-field evaluation that composes the growth calendar, cached field
//! configuration, live sensor readings, rainfall, and learned parameters
//! into one control decision. Dependencies are injected; the engine holds no
//! state of its own beyond its collaborators.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::catalog;
use crate::clock::Clock;
use crate::config::defaults::{
    CRITICAL_MOISTURE_THRESHOLD_PERCENT, MM_PER_CM, PREPARATION_ESTIMATED_DURATION_MIN,
    PREPARATION_TARGET_LEVEL_CM, RAINFALL_THRESHOLD_MM,
};
use crate::error::ControlError;
use crate::fields::FieldConfigStore;
use crate::gateway::SensorGateway;
use crate::learning::{Learner, PredictionConditions};
use crate::runner::ActiveRegistry;
use crate::store::{keys, read_json, KvCache};
use crate::types::{
    ControlAction, ControlDecision, FieldConfig, GrowthPhase, IrrigationNeed, IrrigationStatus,
    MoistureReading, NeedReason, Notification, NotificationKind, NotificationPriority,
    RainfallData,
};

/// Selects the control action for a field
pub struct DecisionEngine {
    fields: Arc<FieldConfigStore>,
    sensors: Arc<dyn SensorGateway>,
    registry: Arc<ActiveRegistry>,
    cache: Arc<dyn KvCache>,
    learner: Arc<Learner>,
    clock: Arc<dyn Clock>,
}

impl DecisionEngine {
    pub fn new(
        fields: Arc<FieldConfigStore>,
        sensors: Arc<dyn SensorGateway>,
        registry: Arc<ActiveRegistry>,
        cache: Arc<dyn KvCache>,
        learner: Arc<Learner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fields,
            sensors,
            registry,
            cache,
            learner,
            clock,
        }
    }

    /// Evaluate a field and select an action.
    ///
    /// A missing or inactive configuration yields `maintain`, never an
    /// error. Sensor unavailability for the water level does surface, since
    /// no phase can be evaluated without it.
    pub async fn decide(&self, field_id: &str) -> Result<ControlDecision, ControlError> {
        let Some(config) = self.fields.get(field_id).await? else {
            return Ok(self.maintain(field_id, "Field AWD control not active", None));
        };
        if !config.is_active {
            return Ok(self.maintain(field_id, "Field AWD control not active", None));
        }

        // Serialize phase advancement with this decision
        let config = self.fields.advance(&config).await?;

        let (level_result, moisture_result, need_result, rainfall_result) = tokio::join!(
            self.sensors.current_water_level(field_id),
            self.sensors.current_moisture(field_id),
            self.sensors.check_irrigation_need(field_id),
            self.sensors.current_rainfall(field_id),
        );

        let level = level_result?.water_level_cm;
        let moisture = moisture_result.unwrap_or_else(|e| {
            warn!(field_id, error = %e, "Moisture read failed, treating as absent");
            None
        });
        let need = match need_result {
            Ok(need) => Some(need),
            Err(e) => {
                warn!(field_id, error = %e, "Irrigation-need check failed");
                None
            }
        };
        let rainfall = match rainfall_result {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(field_id, error = %e, "Rainfall read failed, treating as no data");
                None
            }
        };

        // A field already irrigating is left to its runner
        if let Some(handle) = self.registry.get(field_id) {
            let status: Option<IrrigationStatus> = read_json(
                self.cache.as_ref(),
                &keys::irrigation_status(handle.schedule_id),
            )
            .await;
            let reason = match &status {
                Some(status) => format!(
                    "Irrigation already active: {:.1}cm of {:.1}cm target",
                    status.current_level_cm, status.schedule.target_level_cm
                ),
                None => format!("Irrigation already active (schedule {})", handle.schedule_id),
            };
            let metadata = status.and_then(|s| serde_json::to_value(s).ok());
            return Ok(self.maintain(field_id, reason, metadata));
        }

        let mut decision = match config.current_phase {
            GrowthPhase::Preparation => self.prepare(&config),
            GrowthPhase::Harvest => self.harvest(&config),
            GrowthPhase::Wetting => self.evaluate_wetting(&config, level, rainfall.as_ref()),
            GrowthPhase::Drying => {
                self.evaluate_drying(&config, moisture.as_ref(), need.as_ref())
            }
        };

        self.enrich(&mut decision, level).await;
        Ok(decision)
    }

    fn maintain(
        &self,
        field_id: &str,
        reason: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> ControlDecision {
        let reason = reason.into();
        ControlDecision {
            field_id: field_id.to_string(),
            action: ControlAction::Maintain {
                reason: reason.clone(),
                metadata,
            },
            reason,
            notifications: Vec::new(),
            decided_at: self.clock.now(),
        }
    }

    /// Preparation: flood for puddling regardless of sensor state
    fn prepare(&self, config: &FieldConfig) -> ControlDecision {
        let reason = format!(
            "Preparation phase: flood to {:.0}cm for land preparation",
            PREPARATION_TARGET_LEVEL_CM
        );
        ControlDecision {
            field_id: config.field_id.clone(),
            action: ControlAction::StartIrrigation {
                target_level_cm: PREPARATION_TARGET_LEVEL_CM,
                estimated_duration_min: Some(PREPARATION_ESTIMATED_DURATION_MIN),
                prediction: None,
            },
            reason,
            notifications: Vec::new(),
            decided_at: self.clock.now(),
        }
    }

    /// Harvest: drain and tell the operator the crop calendar is done
    fn harvest(&self, config: &FieldConfig) -> ControlDecision {
        let reason = format!(
            "Harvest phase reached (week {}): terminal drainage",
            config.current_week
        );
        ControlDecision {
            field_id: config.field_id.clone(),
            action: ControlAction::StopIrrigation {
                reason: reason.clone(),
            },
            reason,
            notifications: vec![Notification::new(
                NotificationKind::PhaseChange,
                NotificationPriority::High,
                "Field entered harvest phase: stop all irrigation and drain",
            )],
            decided_at: self.clock.now(),
        }
    }

    /// Wetting: hold the phase target, letting rain do the work when enough
    /// is falling
    fn evaluate_wetting(
        &self,
        config: &FieldConfig,
        level_cm: f64,
        rainfall: Option<&RainfallData>,
    ) -> ControlDecision {
        let schedule = catalog::schedule_for(config.planting_method);
        let phase = schedule.current_phase(config.current_week);
        let target = config.target_water_level_cm;

        let mut notifications = Vec::new();
        if phase.requires_fertilizer && config.current_week == phase.week {
            notifications.push(Notification::new(
                NotificationKind::Fertilizer,
                NotificationPriority::High,
                format!("Fertilizer application due: {}", phase.description),
            ));
        }

        let rain_mm = rainfall.map(|r| r.amount_mm).unwrap_or(0.0);
        if rain_mm > RAINFALL_THRESHOLD_MM {
            let projected = level_cm + rain_mm / MM_PER_CM;
            if projected >= target {
                let reason = format!(
                    "Rainfall {rain_mm:.0}mm is sufficient: projected level {projected:.1}cm reaches target {target:.0}cm"
                );
                return ControlDecision {
                    field_id: config.field_id.clone(),
                    action: ControlAction::StopIrrigation {
                        reason: reason.clone(),
                    },
                    reason,
                    notifications,
                    decided_at: self.clock.now(),
                };
            }
        }

        if level_cm >= target {
            let reason = format!(
                "Target achieved: water level {level_cm:.1}cm at or above target {target:.0}cm"
            );
            return ControlDecision {
                field_id: config.field_id.clone(),
                action: ControlAction::Maintain {
                    reason: reason.clone(),
                    metadata: None,
                },
                reason,
                notifications,
                decided_at: self.clock.now(),
            };
        }

        let reason = format!("Water level {level_cm:.0}cm below target {target:.0}cm");
        ControlDecision {
            field_id: config.field_id.clone(),
            action: ControlAction::StartIrrigation {
                target_level_cm: target,
                estimated_duration_min: None,
                prediction: None,
            },
            reason,
            notifications,
            decided_at: self.clock.now(),
        }
    }

    /// Drying: let the field dry unless the soil is giving out
    fn evaluate_drying(
        &self,
        config: &FieldConfig,
        moisture: Option<&MoistureReading>,
        need: Option<&IrrigationNeed>,
    ) -> ControlDecision {
        if let Some(moisture) = moisture {
            if moisture.moisture_percent < CRITICAL_MOISTURE_THRESHOLD_PERCENT {
                let reason = format!(
                    "Critical soil moisture {:.0}%: emergency rewetting to {:.0}cm",
                    moisture.moisture_percent, PREPARATION_TARGET_LEVEL_CM
                );
                return ControlDecision {
                    field_id: config.field_id.clone(),
                    action: ControlAction::StartIrrigation {
                        target_level_cm: PREPARATION_TARGET_LEVEL_CM,
                        estimated_duration_min: None,
                        prediction: None,
                    },
                    reason: reason.clone(),
                    notifications: vec![Notification::new(
                        NotificationKind::Emergency,
                        NotificationPriority::High,
                        reason,
                    )],
                    decided_at: self.clock.now(),
                };
            }
        }

        if need.is_some_and(|n| n.needs_irrigation && n.reason == NeedReason::MoistureThreshold)
        {
            let reason = format!(
                "Soil moisture below refill threshold: rewetting to {:.0}cm",
                PREPARATION_TARGET_LEVEL_CM
            );
            return ControlDecision {
                field_id: config.field_id.clone(),
                action: ControlAction::StartIrrigation {
                    target_level_cm: PREPARATION_TARGET_LEVEL_CM,
                    estimated_duration_min: None,
                    prediction: None,
                },
                reason,
                notifications: Vec::new(),
                decided_at: self.clock.now(),
            };
        }

        let reason = format!("Drying phase - Week {}", config.current_week);
        ControlDecision {
            field_id: config.field_id.clone(),
            action: ControlAction::StopIrrigation {
                reason: reason.clone(),
            },
            reason,
            notifications: Vec::new(),
            decided_at: self.clock.now(),
        }
    }

    /// Attach the learner's view to a start decision. Learner trouble never
    /// changes the base decision.
    async fn enrich(&self, decision: &mut ControlDecision, current_level_cm: f64) {
        let ControlAction::StartIrrigation {
            target_level_cm,
            estimated_duration_min,
            prediction,
        } = &mut decision.action
        else {
            return;
        };

        let conditions = PredictionConditions {
            initial_level_cm: current_level_cm,
            target_level_cm: *target_level_cm,
        };
        let mut predicted = match self
            .learner
            .predict_performance(&decision.field_id, conditions)
            .await
        {
            Ok(predicted) => predicted,
            Err(e) => {
                warn!(
                    field_id = %decision.field_id,
                    error = %e,
                    "Learner unavailable, returning base decision"
                );
                return;
            }
        };

        predicted.recommended_start = Some(self.recommended_start(&decision.field_id).await);
        if estimated_duration_min.is_none() {
            *estimated_duration_min = Some(predicted.estimated_duration_min);
        }
        debug!(
            field_id = %decision.field_id,
            estimated_duration_min = predicted.estimated_duration_min,
            confidence = predicted.confidence,
            samples = predicted.sample_count,
            "Decision enriched with prediction"
        );
        *prediction = Some(predicted);
    }

    /// Start now, unless history says a nearby hour performs better
    async fn recommended_start(&self, field_id: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let best_hour = match self.learner.best_start_hour(field_id).await {
            Ok(Some(hour)) => hour,
            _ => return now,
        };

        let today = now.date_naive().and_hms_opt(best_hour, 0, 0);
        let candidate = today
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map(|at| if at <= now { at + Duration::days(1) } else { at });

        match candidate {
            // Only worth delaying for when the better hour is close
            Some(at) if at - now <= Duration::hours(6) => at,
            _ => now,
        }
    }
}
