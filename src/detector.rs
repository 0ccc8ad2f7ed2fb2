//! Anomaly detection over the monitoring sample stream
//!
//! Pure function, no I/O: the runner feeds it each sample and reacts to what
//! comes back. `sensor_failure` is not produced here; the runner raises it
//! directly when a sample cannot be obtained.
//!
//! Detection order within a tick: low_flow, rapid_drop, no_rise,
//! overflow_risk. The first critical anomaly terminates the run; warnings
//! are recorded and may trigger corrective action.

use serde_json::json;

use crate::config::defaults::{NO_RISE_CRITICAL_COUNT, RAPID_DROP_THRESHOLD_CM};
use crate::types::{Anomaly, AnomalyKind, AnomalySeverity, MonitoringSample};

/// Thresholds for one run, frozen from its [`IrrigationConfig`]
///
/// [`IrrigationConfig`]: crate::types::IrrigationConfig
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub target_level_cm: f64,
    pub min_flow_rate_cm_per_min: f64,
    /// Level above which overflow risk fires: `target + margin`, capped by
    /// the run's emergency stop level
    pub overflow_level_cm: f64,
}

impl From<&crate::types::IrrigationConfig> for DetectorConfig {
    fn from(config: &crate::types::IrrigationConfig) -> Self {
        let margin_ceiling =
            config.target_level_cm + crate::config::defaults::OVERFLOW_MARGIN_CM;
        Self {
            target_level_cm: config.target_level_cm,
            min_flow_rate_cm_per_min: config.min_flow_rate_cm_per_min,
            overflow_level_cm: margin_ceiling.min(config.emergency_stop_level_cm),
        }
    }
}

/// Examine one monitoring sample against its predecessor.
///
/// `no_rise_count` is the number of consecutive below-threshold samples
/// including the current one; the runner maintains it across ticks.
pub fn detect(
    sample: &MonitoringSample,
    previous: Option<&MonitoringSample>,
    no_rise_count: u32,
    config: &DetectorConfig,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let flow = sample.flow_rate_cm_per_min;

    // Low flow: positive but below the minimum. Exactly at the threshold is
    // acceptable flow.
    if (0.0..config.min_flow_rate_cm_per_min).contains(&flow) {
        anomalies.push(Anomaly {
            kind: AnomalyKind::LowFlow,
            severity: AnomalySeverity::Warning,
            description: format!(
                "Flow rate {:.3} cm/min below minimum {:.3} cm/min",
                flow, config.min_flow_rate_cm_per_min
            ),
            metrics: json!({
                "flow_rate_cm_per_min": flow,
                "min_flow_rate_cm_per_min": config.min_flow_rate_cm_per_min,
            }),
            detected_at: sample.time,
        });
    }

    // Rapid drop: the field lost more than the drop threshold since the
    // previous sample, indicating a breach or drain left open
    if let Some(prev) = previous {
        let drop = prev.water_level_cm - sample.water_level_cm;
        if drop > RAPID_DROP_THRESHOLD_CM {
            anomalies.push(Anomaly {
                kind: AnomalyKind::RapidDrop,
                severity: AnomalySeverity::Critical,
                description: format!(
                    "Water level dropped {:.1} cm since previous sample ({:.1} -> {:.1})",
                    drop, prev.water_level_cm, sample.water_level_cm
                ),
                metrics: json!({
                    "previous_level_cm": prev.water_level_cm,
                    "current_level_cm": sample.water_level_cm,
                    "drop_cm": drop,
                }),
                detected_at: sample.time,
            });
        }
    }

    // No rise: enough consecutive below-threshold samples that the gate is
    // evidently not delivering water
    if no_rise_count >= NO_RISE_CRITICAL_COUNT {
        anomalies.push(Anomaly {
            kind: AnomalyKind::NoRise,
            severity: AnomalySeverity::Critical,
            description: format!(
                "No water level rise across {no_rise_count} consecutive samples"
            ),
            metrics: json!({
                "consecutive_samples": no_rise_count,
                "current_level_cm": sample.water_level_cm,
            }),
            detected_at: sample.time,
        });
    }

    // Overflow risk: level past the ceiling. Exactly at the ceiling is
    // still acceptable.
    if sample.water_level_cm > config.overflow_level_cm {
        anomalies.push(Anomaly {
            kind: AnomalyKind::OverflowRisk,
            severity: AnomalySeverity::Critical,
            description: format!(
                "Water level {:.1} cm past overflow ceiling {:.1} cm (target {:.1} cm)",
                sample.water_level_cm, config.overflow_level_cm, config.target_level_cm
            ),
            metrics: json!({
                "current_level_cm": sample.water_level_cm,
                "overflow_level_cm": config.overflow_level_cm,
                "target_level_cm": config.target_level_cm,
            }),
            detected_at: sample.time,
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(level: f64, flow: f64) -> MonitoringSample {
        MonitoringSample {
            schedule_id: Uuid::nil(),
            field_id: "field-1".into(),
            time: Utc::now(),
            water_level_cm: level,
            flow_rate_cm_per_min: flow,
            sensor_id: None,
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            target_level_cm: 10.0,
            min_flow_rate_cm_per_min: 0.05,
            overflow_level_cm: 15.0,
        }
    }

    #[test]
    fn clean_sample_yields_nothing() {
        let anomalies = detect(&sample(6.0, 0.1), None, 0, &config());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn flow_at_threshold_is_not_low_flow() {
        let anomalies = detect(&sample(6.0, 0.05), None, 0, &config());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn flow_below_threshold_is_low_flow_warning() {
        let anomalies = detect(&sample(6.0, 0.04), None, 0, &config());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::LowFlow);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Warning);
    }

    #[test]
    fn negative_flow_is_not_low_flow() {
        // A falling level is rapid-drop territory, not a flow warning
        let anomalies = detect(&sample(6.0, -0.2), None, 0, &config());
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::LowFlow));
    }

    #[test]
    fn drop_over_two_cm_is_critical() {
        let prev = sample(9.0, 0.1);
        let anomalies = detect(&sample(6.5, -0.5), Some(&prev), 0, &config());
        assert!(anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::RapidDrop && a.is_critical()));
    }

    #[test]
    fn drop_of_exactly_two_cm_is_tolerated() {
        let prev = sample(8.0, 0.1);
        let anomalies = detect(&sample(6.0, -0.4), Some(&prev), 0, &config());
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::RapidDrop));
    }

    #[test]
    fn no_rise_fires_at_third_consecutive_sample() {
        let anomalies = detect(&sample(6.0, 0.0), None, 2, &config());
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::NoRise));

        let anomalies = detect(&sample(6.0, 0.0), None, 3, &config());
        assert!(anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::NoRise && a.is_critical()));
    }

    #[test]
    fn overflow_boundary_is_inclusive_of_the_ceiling() {
        // Exactly target + 5 is acceptable
        let anomalies = detect(&sample(15.0, 0.2), None, 0, &config());
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::OverflowRisk));

        // Past the ceiling is critical
        let anomalies = detect(&sample(15.1, 0.2), None, 0, &config());
        assert!(anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::OverflowRisk && a.is_critical()));
    }

    #[test]
    fn detection_order_is_stable_within_a_tick() {
        // Low flow + no rise + overflow all at once: order must be
        // low_flow, no_rise, overflow_risk
        let anomalies = detect(&sample(16.0, 0.01), None, 3, &config());
        let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnomalyKind::LowFlow,
                AnomalyKind::NoRise,
                AnomalyKind::OverflowRisk
            ]
        );
    }

    #[test]
    fn emergency_stop_level_caps_the_overflow_ceiling() {
        let mut irrigation = crate::types::IrrigationConfig::for_field("field-1", 12.0);
        irrigation.emergency_stop_level_cm = 15.0;
        let config = DetectorConfig::from(&irrigation);
        // target + 5 = 17 but the emergency level wins
        assert!((config.overflow_level_cm - 15.0).abs() < 1e-9);
    }
}
