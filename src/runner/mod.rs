//! Irrigation runner
//!
//! Per-run state machine: `preparing -> active -> (completed | failed |
//! cancelled)`. Each active run owns one monitor task that samples the water
//! level on its configured interval, feeds the anomaly detector, and tears
//! the run down when the target is reached, a critical anomaly fires, or the
//! duration budget runs out.
//!
//! Ticks for one schedule are strictly serialized (one task, overruns skip
//! the next tick rather than queueing); runs on different fields proceed
//! concurrently. Teardown is guarded by the registry release so it executes
//! exactly once no matter who requests the stop.

mod registry;

pub use registry::{ActiveRegistry, RunHandle};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::defaults::{
    GATE_CLOSE_ACK_POLL_SECS, GATE_CLOSE_ACK_TIMEOUT_SECS, MAX_CONSECUTIVE_TICK_ERRORS,
    MM_PER_CM, MONITORING_HISTORY_LEN, PADDY_FIELD_AREA_M2, STATUS_CACHE_TTL_SECS,
};
use crate::detector::{detect, DetectorConfig};
use crate::error::ControlError;
use crate::events::{topics, DomainEvent, EventPublisher};
use crate::gateway::{Actuator, SensorGateway};
use crate::store::{keys, write_json, IrrigationRepository, KvCache};
use crate::types::{
    Anomaly, AnomalyKind, AnomalySeverity, GateLevel, IrrigationConfig, IrrigationSchedule,
    IrrigationStatus, LevelSource, MonitoringSample, PerformanceRecord, ScheduleStatus,
    StopReason, WaterLevelReading,
};

/// Drives irrigation runs against their target levels
#[derive(Clone)]
pub struct IrrigationRunner {
    sensors: Arc<dyn SensorGateway>,
    actuator: Arc<dyn Actuator>,
    repo: Arc<dyn IrrigationRepository>,
    cache: Arc<dyn KvCache>,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<ActiveRegistry>,
    clock: Arc<dyn Clock>,
}

/// What one monitoring tick decided
#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    /// Keep monitoring
    Continue,
    /// The run was torn down (completed or stopped); the task must exit
    Finished,
    /// The tick hit recoverable errors; counted toward the error threshold
    Errored,
}

/// One run's monitor: owns the mutable tick state
struct MonitorTask {
    runner: IrrigationRunner,
    config: IrrigationConfig,
    detector: DetectorConfig,
    schedule: IrrigationSchedule,
    cancel: tokio_util::sync::CancellationToken,
    prev_level_cm: f64,
    prev_time: chrono::DateTime<chrono::Utc>,
    history: VecDeque<MonitoringSample>,
    no_rise_count: u32,
    anomaly_count: u32,
    consecutive_errors: u32,
}

impl IrrigationRunner {
    pub fn new(
        sensors: Arc<dyn SensorGateway>,
        actuator: Arc<dyn Actuator>,
        repo: Arc<dyn IrrigationRepository>,
        cache: Arc<dyn KvCache>,
        publisher: Arc<dyn EventPublisher>,
        registry: Arc<ActiveRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sensors,
            actuator,
            repo,
            cache,
            publisher,
            registry,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<ActiveRegistry> {
        &self.registry
    }

    /// Start an irrigation run for a field.
    ///
    /// Fails without registering when the initial level cannot be read from
    /// a real sensor, the field is already active, the schedule cannot be
    /// persisted, or the gate does not open.
    pub async fn start(&self, config: IrrigationConfig) -> Result<Uuid, ControlError> {
        let field_id = config.field_id.clone();

        // A run may only ever complete against real sensor readings, so a
        // field on GIS estimates cannot start one
        let reading = self.sensors.current_water_level(&field_id).await?;
        if reading.source != LevelSource::Sensor {
            return Err(ControlError::SensorUnavailable {
                field_id,
                detail: "only a GIS estimate is available; a level sensor is required".into(),
            });
        }
        let initial_level = reading.water_level_cm;
        if config.target_level_cm <= initial_level {
            return Err(ControlError::InvalidRequest(format!(
                "target {:.1}cm is not above current level {:.1}cm",
                config.target_level_cm, initial_level
            )));
        }

        let schedule_id = Uuid::new_v4();
        let cancel = self.registry.claim(&field_id, schedule_id)?;

        let now = self.clock.now();
        let schedule = IrrigationSchedule {
            id: schedule_id,
            field_id: field_id.clone(),
            scheduled_start: now,
            initial_level_cm: initial_level,
            target_level_cm: config.target_level_cm,
            status: ScheduleStatus::Active,
            actual_end: None,
            final_level_cm: None,
            water_volume_liters: None,
            avg_flow_rate_cm_per_min: None,
        };
        if let Err(e) = self.repo.insert_schedule(&schedule).await {
            self.registry.release(&field_id, schedule_id);
            return Err(e.into());
        }

        let open_result = match config.target_flow_rate_m3s {
            Some(flow) => self.actuator.open_for_flow(&field_id, flow).await,
            None => self.actuator.open(&field_id, GateLevel::High).await,
        };
        if let Err(e) = open_result {
            // Abort cleanly: no registration, schedule marked failed
            self.registry.release(&field_id, schedule_id);
            let mut failed = schedule.clone();
            failed.status = ScheduleStatus::Failed;
            failed.actual_end = Some(self.clock.now());
            failed.final_level_cm = Some(initial_level);
            if let Err(db) = self.repo.update_schedule(&failed).await {
                error!(field_id, error = %db, "Could not record failed start");
            }
            return Err(e);
        }

        self.write_status(&schedule, initial_level, 0.0, None, 0).await;
        self.cache
            .set(
                &keys::irrigation_field(&field_id),
                schedule_id.to_string(),
                Some(StdDuration::from_secs(STATUS_CACHE_TTL_SECS)),
            )
            .await;

        let target_level = config.target_level_cm;
        let interval_sec = config.sensor_check_interval_sec;
        let task = MonitorTask::new(self.clone(), config, schedule, cancel, initial_level, now);
        tokio::spawn(task.run());

        info!(
            field_id,
            %schedule_id,
            initial_level_cm = initial_level,
            "Irrigation started"
        );
        self.publisher.publish(DomainEvent::new(
            topics::AWD_IRRIGATION_EVENTS,
            "irrigation_started",
            &field_id,
            Some(schedule_id),
            serde_json::json!({
                "initial_level_cm": initial_level,
                "target_level_cm": target_level,
                "sensor_check_interval_sec": interval_sec,
            }),
            now,
        ));

        Ok(schedule_id)
    }

    /// Stop a field's active run. Idempotent: a second call (or a stop that
    /// races teardown) is a no-op returning `None`.
    pub async fn stop(
        &self,
        field_id: &str,
        reason: StopReason,
    ) -> Result<Option<Uuid>, ControlError> {
        let Some(handle) = self.registry.get(field_id) else {
            debug!(field_id, "Stop requested but no active irrigation");
            return Ok(None);
        };

        // Stop the monitor first so no further ticks run for this schedule
        handle.cancel.cancel();
        if !self.registry.release(field_id, handle.schedule_id) {
            // The monitor task (or another stop) got there first
            return Ok(None);
        }

        let Some(schedule) = self.repo.schedule(handle.schedule_id).await? else {
            warn!(field_id, schedule_id = %handle.schedule_id, "Active run has no schedule row");
            return Ok(Some(handle.schedule_id));
        };

        // Best-effort final level; GIS is acceptable here since the run is
        // not completing
        let final_level = self
            .sensors
            .current_water_level(field_id)
            .await
            .ok()
            .map(|r| r.water_level_cm);

        self.finalize_stop(schedule, reason, final_level).await;
        Ok(Some(handle.schedule_id))
    }

    /// Stop every active run (process shutdown)
    pub async fn shutdown_all(&self) {
        let fields = self.registry.active_fields();
        if fields.is_empty() {
            return;
        }
        info!(count = fields.len(), "Stopping active irrigations for shutdown");
        for field_id in fields {
            if let Err(e) = self.stop(&field_id, StopReason::Shutdown).await {
                error!(field_id, error = %e, "Shutdown stop failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown (shared by external stops and the monitor task)
    // ------------------------------------------------------------------

    /// Close the gate and wait for the actuator to acknowledge, bounded by
    /// the ack timeout
    async fn close_gate_acknowledged(&self, field_id: &str) -> Result<(), ControlError> {
        let command_id = self.actuator.close(field_id).await?;

        let deadline =
            std::time::Instant::now() + StdDuration::from_secs(GATE_CLOSE_ACK_TIMEOUT_SECS);
        loop {
            match self.actuator.command_status(&command_id).await {
                Ok(status) if status.complete => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(field_id, error = %e, "Close ack poll failed"),
            }
            if std::time::Instant::now() >= deadline {
                return Err(ControlError::ActuatorUnreachable(format!(
                    "close command {command_id} unacknowledged within {GATE_CLOSE_ACK_TIMEOUT_SECS}s"
                )));
            }
            tokio::time::sleep(StdDuration::from_secs(GATE_CLOSE_ACK_POLL_SECS)).await;
        }
    }

    /// Terminate a run that did not reach target. The caller must already
    /// hold the teardown right (successful registry release).
    async fn finalize_stop(
        &self,
        mut schedule: IrrigationSchedule,
        reason: StopReason,
        final_level_cm: Option<f64>,
    ) {
        let mut status = reason.final_status();

        if let Err(e) = self.close_gate_acknowledged(&schedule.field_id).await {
            // The gate may still be open: escalate to failed and alert
            error!(
                field_id = %schedule.field_id,
                schedule_id = %schedule.id,
                error = %e,
                "Gate close unacknowledged during stop"
            );
            status = ScheduleStatus::Failed;
            self.publisher.publish(DomainEvent::new(
                topics::ALERT_NOTIFICATIONS,
                "gate_close_unacknowledged",
                &schedule.field_id,
                Some(schedule.id),
                serde_json::json!({
                    "priority": "critical",
                    "reason": reason,
                    "error": e.to_string(),
                }),
                self.clock.now(),
            ));
        }

        schedule.status = status;
        schedule.actual_end = Some(self.clock.now());
        schedule.final_level_cm = final_level_cm;
        if let Err(e) = self.repo.update_schedule(&schedule).await {
            error!(schedule_id = %schedule.id, error = %e, "Could not persist stopped schedule");
        }

        self.write_status(
            &schedule,
            final_level_cm.unwrap_or(schedule.initial_level_cm),
            0.0,
            None,
            0,
        )
        .await;
        self.cache
            .delete(&keys::irrigation_field(&schedule.field_id))
            .await;

        info!(
            field_id = %schedule.field_id,
            schedule_id = %schedule.id,
            %reason,
            final_status = %schedule.status,
            "Irrigation stopped"
        );
        self.publisher.publish(DomainEvent::new(
            topics::AWD_IRRIGATION_EVENTS,
            "irrigation_stopped",
            &schedule.field_id,
            Some(schedule.id),
            serde_json::json!({
                "reason": reason,
                "status": schedule.status,
                "final_level_cm": final_level_cm,
            }),
            self.clock.now(),
        ));
    }

    /// Finish a run that reached its target. The caller must already hold
    /// the teardown right.
    async fn finalize_complete(&self, mut schedule: IrrigationSchedule, final_level_cm: f64) {
        if let Err(e) = self.close_gate_acknowledged(&schedule.field_id).await {
            // Target was reached but the gate may still be open: this run
            // cannot be trusted as completed
            error!(
                field_id = %schedule.field_id,
                schedule_id = %schedule.id,
                error = %e,
                "Gate close unacknowledged during completion"
            );
            self.publisher.publish(DomainEvent::new(
                topics::ALERT_NOTIFICATIONS,
                "gate_close_unacknowledged",
                &schedule.field_id,
                Some(schedule.id),
                serde_json::json!({
                    "priority": "critical",
                    "error": e.to_string(),
                }),
                self.clock.now(),
            ));
            schedule.status = ScheduleStatus::Failed;
            schedule.actual_end = Some(self.clock.now());
            schedule.final_level_cm = Some(final_level_cm);
            if let Err(db) = self.repo.update_schedule(&schedule).await {
                error!(schedule_id = %schedule.id, error = %db, "Could not persist failed schedule");
            }
            return;
        }

        let end = self.clock.now();
        let duration_min =
            (end - schedule.scheduled_start).num_seconds().max(0) as f64 / 60.0;
        let depth_gained = (final_level_cm - schedule.initial_level_cm).max(0.0);
        // Flow rate over the whole run is judged start-to-end, not from the
        // last sample reference
        let avg_flow = if duration_min > 0.0 {
            (final_level_cm - schedule.initial_level_cm) / duration_min
        } else {
            0.0
        };
        let volume_liters = depth_gained * MM_PER_CM * PADDY_FIELD_AREA_M2;

        schedule.status = ScheduleStatus::Completed;
        schedule.actual_end = Some(end);
        schedule.final_level_cm = Some(final_level_cm);
        schedule.water_volume_liters = Some(volume_liters);
        schedule.avg_flow_rate_cm_per_min = Some(avg_flow);
        if let Err(e) = self.repo.update_schedule(&schedule).await {
            error!(schedule_id = %schedule.id, error = %e, "Could not persist completed schedule");
        }

        // Performance follows the completed update so the learner never sees
        // a record for a schedule still marked active
        let record = PerformanceRecord {
            field_id: schedule.field_id.clone(),
            schedule_id: schedule.id,
            start_time: schedule.scheduled_start,
            end_time: end,
            initial_level_cm: schedule.initial_level_cm,
            target_level_cm: schedule.target_level_cm,
            achieved_level_cm: final_level_cm,
            total_duration_min: duration_min,
            water_volume_liters: volume_liters,
            avg_flow_rate_cm_per_min: avg_flow,
            efficiency_score: PerformanceRecord::efficiency_score(
                final_level_cm,
                schedule.target_level_cm,
                duration_min,
            ),
        };
        if let Err(e) = self.repo.append_performance(&record).await {
            error!(schedule_id = %schedule.id, error = %e, "Could not persist performance record");
        }

        self.write_status(&schedule, final_level_cm, avg_flow, None, 0).await;
        self.cache
            .delete(&keys::irrigation_field(&schedule.field_id))
            .await;

        info!(
            field_id = %schedule.field_id,
            schedule_id = %schedule.id,
            final_level_cm,
            duration_min,
            efficiency = record.efficiency_score,
            "Irrigation completed"
        );
        self.publisher.publish(DomainEvent::new(
            topics::AWD_IRRIGATION_EVENTS,
            "irrigation_completed",
            &schedule.field_id,
            Some(schedule.id),
            serde_json::json!({
                "final_level_cm": final_level_cm,
                "duration_min": duration_min,
                "water_volume_liters": volume_liters,
                "avg_flow_rate_cm_per_min": avg_flow,
                "efficiency_score": record.efficiency_score,
            }),
            end,
        ));
    }

    /// Refresh the live status cache entry for a run
    async fn write_status(
        &self,
        schedule: &IrrigationSchedule,
        current_level_cm: f64,
        flow_rate_cm_per_min: f64,
        estimated_completion_time: Option<chrono::DateTime<chrono::Utc>>,
        anomalies_detected: u32,
    ) {
        let status = IrrigationStatus {
            schedule: schedule.clone(),
            current_level_cm,
            flow_rate_cm_per_min,
            estimated_completion_time,
            anomalies_detected,
        };
        write_json(
            self.cache.as_ref(),
            &keys::irrigation_status(schedule.id),
            &status,
            Some(StdDuration::from_secs(STATUS_CACHE_TTL_SECS)),
        )
        .await;
    }
}

// ============================================================================
// Monitor task
// ============================================================================

impl MonitorTask {
    fn new(
        runner: IrrigationRunner,
        config: IrrigationConfig,
        schedule: IrrigationSchedule,
        cancel: tokio_util::sync::CancellationToken,
        initial_level_cm: f64,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let detector = DetectorConfig::from(&config);
        Self {
            runner,
            config,
            detector,
            schedule,
            cancel,
            prev_level_cm: initial_level_cm,
            prev_time: started_at,
            history: VecDeque::with_capacity(MONITORING_HISTORY_LEN),
            no_rise_count: 0,
            anomaly_count: 0,
            consecutive_errors: 0,
        }
    }

    /// Tick loop. An overrunning tick skips the next firing instead of
    /// queueing it, so samples for one schedule never interleave.
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(
            self.config.sensor_check_interval_sec.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first firing is immediate; swallow it so monitoring starts one
        // interval after the gate opens
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Whoever cancelled performs the teardown
                    debug!(schedule_id = %self.schedule.id, "Monitor cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                TickOutcome::Continue => {
                    self.consecutive_errors = 0;
                }
                TickOutcome::Finished => return,
                TickOutcome::Errored => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors >= MAX_CONSECUTIVE_TICK_ERRORS {
                        error!(
                            schedule_id = %self.schedule.id,
                            errors = self.consecutive_errors,
                            "Too many consecutive monitoring errors"
                        );
                        self.teardown_stop(StopReason::MonitoringError).await;
                        return;
                    }
                }
            }
        }
    }

    /// One monitoring pass. Never lets an error escape: failures become
    /// anomalies, stop reasons, or an `Errored` outcome.
    async fn tick(&mut self) -> TickOutcome {
        let field_id = self.config.field_id.clone();

        // Sample, with one retry before declaring the sensor failed
        let reading = match self.sample_level(&field_id).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(field_id, error = %e, "Water level sample failed");
                let anomaly = Anomaly {
                    kind: AnomalyKind::SensorFailure,
                    severity: AnomalySeverity::Critical,
                    description: format!("Could not obtain water level sample: {e}"),
                    metrics: serde_json::json!({ "error": e.to_string() }),
                    detected_at: self.runner.clock.now(),
                };
                self.record_anomaly(&anomaly).await;
                self.teardown_stop(StopReason::AnomalyCritical).await;
                return TickOutcome::Finished;
            }
        };

        let mut had_error = false;
        let now = self.runner.clock.now();
        let level = reading.water_level_cm;
        let elapsed_min = (now - self.prev_time).num_seconds() as f64 / 60.0;
        let flow = if elapsed_min > 0.0 {
            (level - self.prev_level_cm) / elapsed_min
        } else {
            0.0
        };

        let sample = MonitoringSample {
            schedule_id: self.schedule.id,
            field_id: field_id.clone(),
            time: now,
            water_level_cm: level,
            flow_rate_cm_per_min: flow,
            sensor_id: reading.sensor_id.clone(),
        };
        if let Err(e) = self.runner.repo.append_sample(&sample).await {
            warn!(field_id, error = %e, "Could not persist monitoring sample");
            had_error = true;
        }

        let previous = self.history.back().cloned();
        if self.history.len() >= MONITORING_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample.clone());

        // Consecutive below-threshold samples, counting this one
        if flow < self.config.min_flow_rate_cm_per_min {
            self.no_rise_count += 1;
        } else {
            self.no_rise_count = 0;
        }

        let anomalies = detect(&sample, previous.as_ref(), self.no_rise_count, &self.detector);
        for anomaly in &anomalies {
            self.anomaly_count += 1;
            if !self.record_anomaly(anomaly).await {
                had_error = true;
            }
            if anomaly.is_critical() {
                warn!(
                    field_id,
                    schedule_id = %self.schedule.id,
                    kind = %anomaly.kind,
                    "Critical anomaly, stopping irrigation"
                );
                self.teardown_stop(StopReason::AnomalyCritical).await;
                return TickOutcome::Finished;
            }
            if anomaly.kind == AnomalyKind::LowFlow {
                // Advisory: ask for more opening; failure here is not fatal
                if let Err(e) = self.runner.actuator.open(&field_id, GateLevel::High).await {
                    debug!(field_id, error = %e, "Low-flow gate adjustment failed");
                }
            }
        }

        // Completion boundary is inclusive: exactly target - tolerance is done
        if level >= self.config.target_level_cm - self.config.tolerance_cm {
            self.runner
                .finalize_complete_guarded(&self.schedule, level)
                .await;
            return TickOutcome::Finished;
        }

        let eta = if flow > 0.0 {
            let minutes_left = (self.config.target_level_cm - level) / flow;
            Some(now + Duration::seconds((minutes_left * 60.0) as i64))
        } else {
            None
        };
        self.runner
            .write_status(&self.schedule, level, flow, eta, self.anomaly_count)
            .await;

        let elapsed_total_min = (now - self.schedule.scheduled_start).num_minutes();
        if elapsed_total_min > self.config.max_duration_min {
            warn!(
                field_id,
                schedule_id = %self.schedule.id,
                elapsed_total_min,
                "Maximum duration exceeded"
            );
            self.teardown_stop(StopReason::Timeout).await;
            return TickOutcome::Finished;
        }

        self.prev_level_cm = level;
        self.prev_time = now;

        if had_error {
            TickOutcome::Errored
        } else {
            TickOutcome::Continue
        }
    }

    /// Read the level from a real sensor, retrying once. GIS estimates do
    /// not qualify: a run must never complete against modelled data.
    async fn sample_level(&self, field_id: &str) -> Result<WaterLevelReading, ControlError> {
        for attempt in 0..2 {
            match self.runner.sensors.current_water_level(field_id).await {
                Ok(reading) if reading.source == LevelSource::Sensor => return Ok(reading),
                Ok(_) => {
                    debug!(field_id, attempt, "Got GIS estimate instead of sensor reading");
                }
                Err(e) => {
                    debug!(field_id, attempt, error = %e, "Sample attempt failed");
                }
            }
        }
        Err(ControlError::SensorUnavailable {
            field_id: field_id.to_string(),
            detail: "no sensor reading after retry".into(),
        })
    }

    /// Persist and announce an anomaly. Returns false when persistence failed.
    async fn record_anomaly(&self, anomaly: &Anomaly) -> bool {
        let ok = match self
            .runner
            .repo
            .append_anomaly(self.schedule.id, &self.config.field_id, anomaly)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    schedule_id = %self.schedule.id,
                    kind = %anomaly.kind,
                    error = %e,
                    "Could not persist anomaly"
                );
                false
            }
        };

        self.runner.publisher.publish(DomainEvent::new(
            topics::AWD_IRRIGATION_EVENTS,
            "irrigation_anomaly",
            &self.config.field_id,
            Some(self.schedule.id),
            serde_json::json!({
                "kind": anomaly.kind,
                "severity": anomaly.severity,
                "description": anomaly.description,
                "metrics": anomaly.metrics,
            }),
            anomaly.detected_at,
        ));
        ok
    }

    /// Stop from inside the tick. Teardown only runs if this task still
    /// holds the registry claim (an external stop may have raced us).
    async fn teardown_stop(&self, reason: StopReason) {
        if !self
            .runner
            .registry
            .release(&self.config.field_id, self.schedule.id)
        {
            return;
        }
        let final_level = self.history.back().map(|s| s.water_level_cm);
        self.runner
            .finalize_stop(self.schedule.clone(), reason, final_level)
            .await;
    }
}

impl IrrigationRunner {
    /// Completion entry point for the monitor task: completes only if the
    /// task still holds the registry claim.
    async fn finalize_complete_guarded(&self, schedule: &IrrigationSchedule, final_level: f64) {
        if !self.registry.release(&schedule.field_id, schedule.id) {
            return;
        }
        self.finalize_complete(schedule.clone(), final_level).await;
    }
}
