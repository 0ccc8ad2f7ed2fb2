//! Learner output types: predictions, recommended parameters, patterns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Season classification used for duration adjustment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Dry,
    Wet,
    Normal,
}

impl Season {
    /// Nov-Feb is the dry season, Jun-Oct the wet season.
    pub fn from_month(month: u32) -> Self {
        match month {
            11 | 12 | 1 | 2 => Season::Dry,
            6..=10 => Season::Wet,
            _ => Season::Normal,
        }
    }

    /// Duration multiplier applied to predictions
    pub fn duration_multiplier(self) -> f64 {
        match self {
            Season::Dry => 1.2,
            Season::Wet => 0.9,
            Season::Normal => 1.0,
        }
    }
}

/// Predicted performance for an upcoming irrigation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformancePrediction {
    pub field_id: String,
    pub estimated_duration_min: f64,
    pub expected_flow_rate_cm_per_min: f64,
    pub expected_volume_liters: f64,
    /// 95% confidence interval on the duration estimate (minutes)
    pub duration_ci_95_min: (f64, f64),
    /// 0.3 for the cold-start default, higher with more similar history
    pub confidence: f64,
    pub sample_count: usize,
    pub season: Season,
    #[serde(default)]
    pub recommended_start: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// Run parameters recommended from recent performance history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimalRunParameters {
    pub sensor_check_interval_sec: u64,
    pub min_flow_rate_threshold_cm_per_min: f64,
    pub max_duration_min: i64,
    pub tolerance_cm: f64,
    /// Whether there was enough history or the defaults were returned
    pub derived_from_history: bool,
}

impl Default for OptimalRunParameters {
    fn default() -> Self {
        Self {
            sensor_check_interval_sec: crate::config::defaults::DEFAULT_SENSOR_CHECK_INTERVAL_SECS,
            min_flow_rate_threshold_cm_per_min:
                crate::config::defaults::DEFAULT_MIN_FLOW_RATE_CM_PER_MIN,
            max_duration_min: crate::config::defaults::DEFAULT_MAX_DURATION_MIN,
            tolerance_cm: crate::config::defaults::DEFAULT_TOLERANCE_CM,
            derived_from_history: false,
        }
    }
}

/// Recurring behavior detected in a field's irrigation history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    HighFlowVariability,
    TimeDependentEfficiency,
    FrequentAnomalies,
    ImprovingEfficiency,
    DecliningEfficiency,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::HighFlowVariability => write!(f, "high_flow_variability"),
            PatternKind::TimeDependentEfficiency => write!(f, "time_dependent_efficiency"),
            PatternKind::FrequentAnomalies => write!(f, "frequent_anomalies"),
            PatternKind::ImprovingEfficiency => write!(f, "improving_efficiency"),
            PatternKind::DecliningEfficiency => write!(f, "declining_efficiency"),
        }
    }
}

/// A detected pattern with the statistic that crossed its threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPattern {
    pub kind: PatternKind,
    pub description: String,
    /// Observed statistic vs the threshold that flagged it
    pub observed: f64,
    pub threshold: f64,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_from_month_covers_the_year() {
        assert_eq!(Season::from_month(11), Season::Dry);
        assert_eq!(Season::from_month(12), Season::Dry);
        assert_eq!(Season::from_month(1), Season::Dry);
        assert_eq!(Season::from_month(2), Season::Dry);
        assert_eq!(Season::from_month(3), Season::Normal);
        assert_eq!(Season::from_month(5), Season::Normal);
        assert_eq!(Season::from_month(6), Season::Wet);
        assert_eq!(Season::from_month(10), Season::Wet);
    }

    #[test]
    fn seasonal_multipliers() {
        assert!((Season::Dry.duration_multiplier() - 1.2).abs() < 1e-9);
        assert!((Season::Wet.duration_multiplier() - 0.9).abs() < 1e-9);
        assert!((Season::Normal.duration_multiplier() - 1.0).abs() < 1e-9);
    }
}
