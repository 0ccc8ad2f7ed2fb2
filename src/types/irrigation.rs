//! Irrigation run types: config, schedule, live status, samples, performance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::defaults;

/// Tunable parameters for a single irrigation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigationConfig {
    pub field_id: String,
    pub target_level_cm: f64,
    /// Permitted undershoot from target at which the run completes
    pub tolerance_cm: f64,
    pub max_duration_min: i64,
    pub sensor_check_interval_sec: u64,
    /// Below this observed rise rate a tick counts as low flow / no rise
    pub min_flow_rate_cm_per_min: f64,
    /// Absolute water level above which the run must never continue
    pub emergency_stop_level_cm: f64,
    /// When set, the gate is opened via the hydraulic collaborator to hit
    /// this flow rate instead of fully open
    #[serde(default)]
    pub target_flow_rate_m3s: Option<f64>,
}

impl IrrigationConfig {
    /// Runner defaults for a field and target level
    pub fn for_field(field_id: impl Into<String>, target_level_cm: f64) -> Self {
        Self {
            field_id: field_id.into(),
            target_level_cm,
            tolerance_cm: defaults::DEFAULT_TOLERANCE_CM,
            max_duration_min: defaults::DEFAULT_MAX_DURATION_MIN,
            sensor_check_interval_sec: defaults::DEFAULT_SENSOR_CHECK_INTERVAL_SECS,
            min_flow_rate_cm_per_min: defaults::DEFAULT_MIN_FLOW_RATE_CM_PER_MIN,
            emergency_stop_level_cm: defaults::DEFAULT_EMERGENCY_STOP_LEVEL_CM,
            target_flow_rate_m3s: None,
        }
    }
}

/// Terminal and live states of an irrigation schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Active => write!(f, "active"),
            ScheduleStatus::Completed => write!(f, "completed"),
            ScheduleStatus::Failed => write!(f, "failed"),
            ScheduleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why an irrigation run was stopped before reaching target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A critical anomaly terminated the run
    AnomalyCritical,
    /// `max_duration_min` elapsed without reaching target
    Timeout,
    /// Operator or upstream service requested the stop
    ExternalCommand,
    /// Process shutdown drained the registry
    Shutdown,
    /// Consecutive tick failures exceeded the error threshold
    MonitoringError,
}

impl StopReason {
    /// Schedule status a stop with this reason resolves to
    pub fn final_status(self) -> ScheduleStatus {
        match self {
            StopReason::AnomalyCritical => ScheduleStatus::Failed,
            _ => ScheduleStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::AnomalyCritical => write!(f, "anomaly_critical"),
            StopReason::Timeout => write!(f, "timeout"),
            StopReason::ExternalCommand => write!(f, "external_command"),
            StopReason::Shutdown => write!(f, "shutdown"),
            StopReason::MonitoringError => write!(f, "monitoring_error"),
        }
    }
}

/// Persistent record of one irrigation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigationSchedule {
    pub id: Uuid,
    pub field_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub initial_level_cm: f64,
    pub target_level_cm: f64,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub actual_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub final_level_cm: Option<f64>,
    #[serde(default)]
    pub water_volume_liters: Option<f64>,
    #[serde(default)]
    pub avg_flow_rate_cm_per_min: Option<f64>,
}

/// Live view of a running (or recently finished) irrigation, cached under
/// `irrigation:status:{schedule_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigationStatus {
    #[serde(flatten)]
    pub schedule: IrrigationSchedule,
    pub current_level_cm: f64,
    pub flow_rate_cm_per_min: f64,
    /// Absent when the observed flow rate is zero or negative
    #[serde(default)]
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub anomalies_detected: u32,
}

/// One water level sample recorded during monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSample {
    pub schedule_id: Uuid,
    pub field_id: String,
    pub time: DateTime<Utc>,
    pub water_level_cm: f64,
    pub flow_rate_cm_per_min: f64,
    #[serde(default)]
    pub sensor_id: Option<String>,
}

/// Summary of one completed (or terminated) run, consumed by the learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub field_id: String,
    pub schedule_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub initial_level_cm: f64,
    pub target_level_cm: f64,
    pub achieved_level_cm: f64,
    pub total_duration_min: f64,
    pub water_volume_liters: f64,
    pub avg_flow_rate_cm_per_min: f64,
    /// Composite of target accuracy and duration efficiency, in [0, 1]
    pub efficiency_score: f64,
}

impl PerformanceRecord {
    /// Efficiency score: 0.7 for hitting within 1 cm of target, plus 0.3
    /// scaled by how far under the 6-hour reference duration the run came in.
    pub fn efficiency_score(
        achieved_level_cm: f64,
        target_level_cm: f64,
        total_duration_min: f64,
    ) -> f64 {
        let accuracy = if (achieved_level_cm - target_level_cm).abs() < 1.0 {
            defaults::EFFICIENCY_ACCURACY_WEIGHT
        } else {
            0.0
        };
        let duration = if total_duration_min > 0.0 {
            defaults::EFFICIENCY_DURATION_WEIGHT
                * (defaults::EFFICIENCY_DURATION_REF_MIN / total_duration_min).min(1.0)
        } else {
            defaults::EFFICIENCY_DURATION_WEIGHT
        };
        accuracy + duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_is_one_iff_accurate_and_fast() {
        // Within 1 cm and under 360 min
        let s = PerformanceRecord::efficiency_score(10.5, 10.0, 240.0);
        assert!((s - 1.0).abs() < 1e-9);

        // Exactly at the 360 min reference still scores 1.0
        let s = PerformanceRecord::efficiency_score(10.0, 10.0, 360.0);
        assert!((s - 1.0).abs() < 1e-9);

        // Slow run loses duration credit proportionally
        let s = PerformanceRecord::efficiency_score(10.0, 10.0, 720.0);
        assert!((s - 0.85).abs() < 1e-9);

        // Missed target loses the accuracy component entirely
        let s = PerformanceRecord::efficiency_score(8.0, 10.0, 240.0);
        assert!((s - 0.3).abs() < 1e-9);
    }

    #[test]
    fn efficiency_stays_in_unit_interval() {
        for (achieved, target, dur) in [
            (0.0, 10.0, 1.0),
            (10.0, 10.0, 0.0),
            (10.0, 10.0, 100_000.0),
            (-5.0, 10.0, 5000.0),
        ] {
            let s = PerformanceRecord::efficiency_score(achieved, target, dur);
            assert!((0.0..=1.0).contains(&s), "score {} out of range", s);
        }
    }

    #[test]
    fn status_round_trips_through_json() {
        let status = IrrigationStatus {
            schedule: IrrigationSchedule {
                id: uuid::Uuid::new_v4(),
                field_id: "field-9".into(),
                scheduled_start: chrono::Utc::now(),
                initial_level_cm: 4.0,
                target_level_cm: 10.0,
                status: ScheduleStatus::Active,
                actual_end: None,
                final_level_cm: None,
                water_volume_liters: None,
                avg_flow_rate_cm_per_min: None,
            },
            current_level_cm: 6.5,
            flow_rate_cm_per_min: 0.12,
            estimated_completion_time: Some(chrono::Utc::now()),
            anomalies_detected: 2,
        };

        let json = serde_json::to_string(&status).unwrap();
        let restored: IrrigationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.schedule.id, status.schedule.id);
        assert_eq!(restored.schedule.status, ScheduleStatus::Active);
        assert_eq!(restored.current_level_cm, 6.5);
        assert_eq!(restored.anomalies_detected, 2);
        assert!(restored.estimated_completion_time.is_some());
    }

    #[test]
    fn stop_reason_maps_to_final_status() {
        assert_eq!(
            StopReason::AnomalyCritical.final_status(),
            ScheduleStatus::Failed
        );
        assert_eq!(StopReason::Timeout.final_status(), ScheduleStatus::Cancelled);
        assert_eq!(
            StopReason::Shutdown.final_status(),
            ScheduleStatus::Cancelled
        );
    }
}
