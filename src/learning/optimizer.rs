//! Recommended run parameters from recent performance

use statrs::statistics::Statistics;
use tracing::debug;

use super::Learner;
use crate::config::defaults::{MIN_SAMPLES_FOR_PREDICTION, OPTIMAL_WINDOW_DAYS};
use crate::error::ControlError;
use crate::types::{OptimalRunParameters, PerformanceRecord};

impl Learner {
    /// Derive run parameters from the last 60 days of efficient runs
    /// (efficiency above 0.6). Falls back to the runner defaults when the
    /// history is too thin.
    ///
    /// - check interval follows typical duration: fast fills get sampled
    ///   every 3 minutes, long ones every 10
    /// - the low-flow threshold adapts to the slowest flow this field has
    ///   historically sustained, floored at 0.03 cm/min
    /// - the duration budget is the observed mean plus two standard
    ///   deviations
    /// - a field with many recent anomalies gets a tighter tolerance so runs
    ///   end closer to target
    pub async fn optimal_parameters(
        &self,
        field_id: &str,
    ) -> Result<OptimalRunParameters, ControlError> {
        let now = self.clock.now();
        let since = now - chrono::Duration::days(OPTIMAL_WINDOW_DAYS);
        let records: Vec<PerformanceRecord> = self
            .repo
            .performance_since(field_id, since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?
            .into_iter()
            .filter(|r| r.efficiency_score > 0.6)
            .collect();

        if records.len() < MIN_SAMPLES_FOR_PREDICTION {
            debug!(
                field_id,
                efficient_runs = records.len(),
                "Insufficient history, recommending default run parameters"
            );
            return Ok(OptimalRunParameters::default());
        }

        let durations: Vec<f64> = records.iter().map(|r| r.total_duration_min).collect();
        let avg_duration = (&durations).mean();
        let duration_std_dev = (&durations).std_dev();

        let sensor_check_interval_sec = if avg_duration < 120.0 {
            180
        } else if avg_duration < 360.0 {
            300
        } else {
            600
        };

        let min_flow = records
            .iter()
            .map(|r| r.avg_flow_rate_cm_per_min)
            .fold(f64::INFINITY, f64::min);
        let min_flow_rate_threshold_cm_per_min = (min_flow * 0.8).max(0.03);

        let max_duration_min = (avg_duration + 2.0 * duration_std_dev).round() as i64;

        let anomaly_count = self
            .repo
            .anomalies_since(field_id, since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?
            .len();
        let tolerance_cm = if anomaly_count > 5 { 0.5 } else { 1.0 };

        Ok(OptimalRunParameters {
            sensor_check_interval_sec,
            min_flow_rate_threshold_cm_per_min,
            max_duration_min,
            tolerance_cm,
            derived_from_history: true,
        })
    }
}
