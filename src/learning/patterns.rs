//! Recurring operation patterns in a field's irrigation history

use std::collections::HashMap;

use chrono::Timelike;
use statrs::statistics::Statistics;

use super::Learner;
use crate::config::defaults::{OPTIMAL_WINDOW_DAYS, PATTERN_SHORT_WINDOW_DAYS};
use crate::error::ControlError;
use crate::types::{OperationPattern, PatternKind, PerformanceRecord};

/// Coefficient of variation above which flow is considered erratic
const FLOW_CV_THRESHOLD: f64 = 0.3;

/// Best-minus-worst hourly efficiency spread that flags time dependence
const HOURLY_EFFICIENCY_SPREAD_THRESHOLD: f64 = 0.2;

/// Runs an hour bucket needs before it counts toward the hourly analysis
const MIN_RUNS_PER_HOUR: usize = 3;

/// Qualifying hour buckets needed for the hourly analysis
const MIN_QUALIFYING_HOURS: usize = 3;

/// Anomalies in the short window that flag a problem field
const FREQUENT_ANOMALY_THRESHOLD: usize = 5;

/// First-half/second-half efficiency shift that flags a trend
const EFFICIENCY_TREND_THRESHOLD: f64 = 0.1;

impl Learner {
    /// Detect recurring behaviors worth an operator's attention.
    ///
    /// Returns zero or more patterns; each carries the statistic that
    /// crossed its threshold and concrete recommendations.
    pub async fn patterns(&self, field_id: &str) -> Result<Vec<OperationPattern>, ControlError> {
        let now = self.clock.now();
        let short_since = now - chrono::Duration::days(PATTERN_SHORT_WINDOW_DAYS);
        let long_since = now - chrono::Duration::days(OPTIMAL_WINDOW_DAYS);

        let short_window = self
            .repo
            .performance_since(field_id, short_since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?;
        let long_window = self
            .repo
            .performance_since(field_id, long_since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?;
        let anomaly_count = self
            .repo
            .anomalies_since(field_id, short_since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?
            .len();

        let mut found = Vec::new();

        if let Some(pattern) = flow_variability(&short_window) {
            found.push(pattern);
        }
        if let Some(pattern) = time_dependent_efficiency(&long_window) {
            found.push(pattern);
        }
        if anomaly_count > FREQUENT_ANOMALY_THRESHOLD {
            found.push(OperationPattern {
                kind: PatternKind::FrequentAnomalies,
                description: format!(
                    "{anomaly_count} anomalies in the last {PATTERN_SHORT_WINDOW_DAYS} days"
                ),
                observed: anomaly_count as f64,
                threshold: FREQUENT_ANOMALY_THRESHOLD as f64,
                recommendations: vec![
                    "Inspect the field inlet and sensor installation".to_string(),
                    "Tighten the completion tolerance for upcoming runs".to_string(),
                ],
            });
        }
        if let Some(pattern) = efficiency_trend(&long_window) {
            found.push(pattern);
        }

        Ok(found)
    }

    /// Hour of day at which this field historically irrigates best, if the
    /// hourly analysis qualifies
    pub async fn best_start_hour(&self, field_id: &str) -> Result<Option<u32>, ControlError> {
        let since = self.clock.now() - chrono::Duration::days(OPTIMAL_WINDOW_DAYS);
        let records = self
            .repo
            .performance_since(field_id, since)
            .await
            .map_err(|e| ControlError::LearnerUnavailable(e.to_string()))?;
        Ok(hourly_stats(&records).map(|stats| stats.best_hour))
    }
}

fn flow_variability(records: &[PerformanceRecord]) -> Option<OperationPattern> {
    if records.len() < 5 {
        return None;
    }
    let flows: Vec<f64> = records.iter().map(|r| r.avg_flow_rate_cm_per_min).collect();
    let mean = (&flows).mean();
    if mean <= 0.0 {
        return None;
    }
    let cv = (&flows).std_dev() / mean;
    if cv <= FLOW_CV_THRESHOLD {
        return None;
    }
    Some(OperationPattern {
        kind: PatternKind::HighFlowVariability,
        description: format!(
            "Flow rate varies {:.0}% around its mean across {} runs",
            cv * 100.0,
            records.len()
        ),
        observed: cv,
        threshold: FLOW_CV_THRESHOLD,
        recommendations: vec![
            "Check canal supply pressure at the field's station".to_string(),
            "Prefer flow-targeted gate openings over fixed levels".to_string(),
        ],
    })
}

struct HourlyStats {
    best_hour: u32,
    worst_hour: u32,
    spread: f64,
}

/// Per-hour efficiency averages over hours with enough runs
fn hourly_stats(records: &[PerformanceRecord]) -> Option<HourlyStats> {
    let mut by_hour: HashMap<u32, Vec<f64>> = HashMap::new();
    for record in records {
        by_hour
            .entry(record.start_time.hour())
            .or_default()
            .push(record.efficiency_score);
    }

    let qualified: Vec<(u32, f64)> = by_hour
        .into_iter()
        .filter(|(_, scores)| scores.len() >= MIN_RUNS_PER_HOUR)
        .map(|(hour, scores)| {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (hour, mean)
        })
        .collect();
    if qualified.len() < MIN_QUALIFYING_HOURS {
        return None;
    }

    let (best_hour, best) = qualified
        .iter()
        .copied()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let (worst_hour, worst) = qualified
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    Some(HourlyStats {
        best_hour,
        worst_hour,
        spread: best - worst,
    })
}

fn time_dependent_efficiency(records: &[PerformanceRecord]) -> Option<OperationPattern> {
    let stats = hourly_stats(records)?;
    if stats.spread <= HOURLY_EFFICIENCY_SPREAD_THRESHOLD {
        return None;
    }
    Some(OperationPattern {
        kind: PatternKind::TimeDependentEfficiency,
        description: format!(
            "Runs starting around {:02}:00 outperform those around {:02}:00",
            stats.best_hour, stats.worst_hour
        ),
        observed: stats.spread,
        threshold: HOURLY_EFFICIENCY_SPREAD_THRESHOLD,
        recommendations: vec![format!(
            "Schedule irrigations near {:02}:00 when the decision allows",
            stats.best_hour
        )],
    })
}

fn efficiency_trend(records: &[PerformanceRecord]) -> Option<OperationPattern> {
    if records.len() < 6 {
        return None;
    }
    let mut ordered: Vec<&PerformanceRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.end_time);

    let mid = ordered.len() / 2;
    let first: f64 =
        ordered[..mid].iter().map(|r| r.efficiency_score).sum::<f64>() / mid as f64;
    let second: f64 = ordered[mid..].iter().map(|r| r.efficiency_score).sum::<f64>()
        / (ordered.len() - mid) as f64;
    let shift = second - first;

    if shift > EFFICIENCY_TREND_THRESHOLD {
        Some(OperationPattern {
            kind: PatternKind::ImprovingEfficiency,
            description: format!(
                "Efficiency improved {:.2} between window halves",
                shift
            ),
            observed: shift,
            threshold: EFFICIENCY_TREND_THRESHOLD,
            recommendations: vec!["Keep the current run parameters".to_string()],
        })
    } else if shift < -EFFICIENCY_TREND_THRESHOLD {
        Some(OperationPattern {
            kind: PatternKind::DecliningEfficiency,
            description: format!(
                "Efficiency declined {:.2} between window halves",
                -shift
            ),
            observed: shift,
            threshold: -EFFICIENCY_TREND_THRESHOLD,
            recommendations: vec![
                "Review recent anomalies and gate behavior".to_string(),
                "Re-derive run parameters from recent history".to_string(),
            ],
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn record(
        days_ago: i64,
        hour: u32,
        flow: f64,
        efficiency: f64,
    ) -> PerformanceRecord {
        let end = Utc::now() - Duration::days(days_ago);
        let start = end
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(end);
        PerformanceRecord {
            field_id: "field-1".into(),
            schedule_id: Uuid::new_v4(),
            start_time: start,
            end_time: end,
            initial_level_cm: 4.0,
            target_level_cm: 10.0,
            achieved_level_cm: 9.8,
            total_duration_min: 240.0,
            water_volume_liters: 90_000.0,
            avg_flow_rate_cm_per_min: flow,
            efficiency_score: efficiency,
        }
    }

    #[test]
    fn stable_flow_is_not_flagged() {
        let records: Vec<_> = (0..8).map(|i| record(i, 6, 0.05, 0.9)).collect();
        assert!(flow_variability(&records).is_none());
    }

    #[test]
    fn erratic_flow_is_flagged() {
        let flows = [0.01, 0.09, 0.02, 0.08, 0.01, 0.09];
        let records: Vec<_> = flows
            .iter()
            .enumerate()
            .map(|(i, flow)| record(i as i64, 6, *flow, 0.9))
            .collect();
        let pattern = flow_variability(&records).unwrap();
        assert_eq!(pattern.kind, PatternKind::HighFlowVariability);
        assert!(pattern.observed > pattern.threshold);
    }

    #[test]
    fn fewer_than_five_runs_never_flags_variability() {
        let flows = [0.01, 0.09, 0.02, 0.08];
        let records: Vec<_> = flows
            .iter()
            .enumerate()
            .map(|(i, flow)| record(i as i64, 6, *flow, 0.9))
            .collect();
        assert!(flow_variability(&records).is_none());
    }

    #[test]
    fn hourly_spread_names_best_and_worst_hours() {
        let mut records = Vec::new();
        // 06:00 runs are efficient, 13:00 poor, 18:00 middling
        for i in 0..4 {
            records.push(record(i, 6, 0.05, 0.95));
            records.push(record(i + 10, 13, 0.05, 0.5));
            records.push(record(i + 20, 18, 0.05, 0.7));
        }
        let pattern = time_dependent_efficiency(&records).unwrap();
        assert_eq!(pattern.kind, PatternKind::TimeDependentEfficiency);
        assert!(pattern.description.contains("06:00"));
        assert!(pattern.description.contains("13:00"));
    }

    #[test]
    fn declining_efficiency_is_detected() {
        let mut records = Vec::new();
        for i in 0..4 {
            records.push(record(40 + i, 6, 0.05, 0.95)); // older, good
            records.push(record(i, 6, 0.05, 0.6)); // recent, poor
        }
        let pattern = efficiency_trend(&records).unwrap();
        assert_eq!(pattern.kind, PatternKind::DecliningEfficiency);
    }
}
