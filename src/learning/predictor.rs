//! Performance prediction from similar historical runs
//!
//! Recent records with a similar starting point and target are combined
//! under a recency/similarity/quality weighting. Too little history yields a
//! conservative default instead of an extrapolation.

use std::time::Duration as StdDuration;

use chrono::Datelike;
use statrs::statistics::Statistics;
use tracing::debug;

use super::Learner;
use crate::config::defaults::{
    DEFAULT_FILL_MIN_PER_CM, DEFAULT_PREDICTION_CONFIDENCE, MIN_SAMPLES_FOR_PREDICTION, MM_PER_CM,
    PADDY_FIELD_AREA_M2, PREDICTION_CACHE_TTL_SECS, PREDICTION_WINDOW_DAYS,
    SIMILAR_INITIAL_BAND_CM, SIMILAR_TARGET_BAND_CM,
};
use crate::error::ControlError;
use crate::store::{keys, write_json};
use crate::types::{PerformancePrediction, PerformanceRecord, Season};

/// The starting point a prediction is asked about
#[derive(Debug, Clone, Copy)]
pub struct PredictionConditions {
    pub initial_level_cm: f64,
    pub target_level_cm: f64,
}

impl Learner {
    /// Predict duration, flow rate, and volume for an upcoming run.
    ///
    /// Selection: last 90 days, initial level within ±3 cm, target within
    /// ±2 cm, efficiency above 0.5. With fewer than five such records the
    /// default fill-rate estimate is returned at low confidence. Each
    /// selected record is weighted by
    /// `exp(-days_ago/30) * exp(-|Δinitial|/5) * efficiency`.
    pub async fn predict_performance(
        &self,
        field_id: &str,
        conditions: PredictionConditions,
    ) -> Result<PerformancePrediction, ControlError> {
        let now = self.clock.now();
        let since = now - chrono::Duration::days(PREDICTION_WINDOW_DAYS);
        let records = self
            .repo
            .performance_since(field_id, since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?;

        let similar: Vec<&PerformanceRecord> = records
            .iter()
            .filter(|r| {
                (r.initial_level_cm - conditions.initial_level_cm).abs()
                    <= SIMILAR_INITIAL_BAND_CM
                    && (r.target_level_cm - conditions.target_level_cm).abs()
                        <= SIMILAR_TARGET_BAND_CM
                    && r.efficiency_score > 0.5
            })
            .collect();

        let season = Season::from_month(now.month());
        let prediction = if similar.len() < MIN_SAMPLES_FOR_PREDICTION {
            debug!(
                field_id,
                similar = similar.len(),
                "Insufficient history, using default prediction"
            );
            Self::default_prediction(field_id, conditions, season, similar.len(), now)
        } else {
            let mut weight_sum = 0.0;
            let mut duration_acc = 0.0;
            let mut flow_acc = 0.0;
            let mut volume_acc = 0.0;
            for record in &similar {
                let days_ago = (now - record.end_time).num_days().max(0) as f64;
                let delta_initial =
                    (record.initial_level_cm - conditions.initial_level_cm).abs();
                let weight = (-days_ago / 30.0).exp()
                    * (-delta_initial / 5.0).exp()
                    * record.efficiency_score;
                weight_sum += weight;
                duration_acc += weight * record.total_duration_min;
                flow_acc += weight * record.avg_flow_rate_cm_per_min;
                volume_acc += weight * record.water_volume_liters;
            }

            let multiplier = season.duration_multiplier();
            let duration = (duration_acc / weight_sum) * multiplier;
            let flow = flow_acc / weight_sum;
            let volume = volume_acc / weight_sum;

            let durations: Vec<f64> =
                similar.iter().map(|r| r.total_duration_min).collect();
            let std_dev = (&durations).std_dev();
            let half_width = 1.96 * std_dev / (durations.len() as f64).sqrt();

            PerformancePrediction {
                field_id: field_id.to_string(),
                estimated_duration_min: duration,
                expected_flow_rate_cm_per_min: flow,
                expected_volume_liters: volume,
                duration_ci_95_min: (
                    (duration - half_width).max(0.0),
                    duration + half_width,
                ),
                confidence: Self::confidence_for(similar.len()),
                sample_count: similar.len(),
                season,
                recommended_start: None,
                generated_at: now,
            }
        };

        write_json(
            self.cache.as_ref(),
            &keys::prediction(field_id),
            &prediction,
            Some(StdDuration::from_secs(PREDICTION_CACHE_TTL_SECS)),
        )
        .await;

        Ok(prediction)
    }

    /// Cold-start estimate: one hour per cm of depth at the matching flow
    fn default_prediction(
        field_id: &str,
        conditions: PredictionConditions,
        season: Season,
        sample_count: usize,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PerformancePrediction {
        let depth_cm = (conditions.target_level_cm - conditions.initial_level_cm).max(0.0);
        let duration = depth_cm * DEFAULT_FILL_MIN_PER_CM;
        PerformancePrediction {
            field_id: field_id.to_string(),
            estimated_duration_min: duration,
            expected_flow_rate_cm_per_min: 1.0 / DEFAULT_FILL_MIN_PER_CM,
            expected_volume_liters: depth_cm * MM_PER_CM * PADDY_FIELD_AREA_M2,
            duration_ci_95_min: (duration, duration),
            confidence: DEFAULT_PREDICTION_CONFIDENCE,
            sample_count,
            season,
            recommended_start: None,
            generated_at: now,
        }
    }

    /// More similar history means more confidence, saturating at 0.9
    fn confidence_for(sample_count: usize) -> f64 {
        (0.4 + 0.025 * sample_count as f64).min(0.9)
    }
}
