//! Learner behavior over seeded performance history

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use paddi_os::clock::{Clock, ManualClock};
use paddi_os::learning::{Learner, PredictionConditions};
use paddi_os::store::{IrrigationRepository, MemoryCache, SledStore};
use paddi_os::types::{Anomaly, AnomalyKind, AnomalySeverity, PerformanceRecord, Season};

struct Setup {
    _dir: tempfile::TempDir,
    store: Arc<SledStore>,
    learner: Learner,
    clock: Arc<ManualClock>,
}

fn setup(year: i32, month: u32) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(year, month, 15, 8, 0, 0).unwrap(),
    ));
    let learner = Learner::new(store.clone(), Arc::new(MemoryCache::new()), clock.clone());
    Setup {
        _dir: dir,
        store,
        learner,
        clock,
    }
}

fn record(
    clock: &ManualClock,
    days_ago: i64,
    initial: f64,
    target: f64,
    duration_min: f64,
    flow: f64,
    efficiency: f64,
) -> PerformanceRecord {
    let end = clock.now() - Duration::days(days_ago);
    PerformanceRecord {
        field_id: "field-1".into(),
        schedule_id: Uuid::new_v4(),
        start_time: end - Duration::minutes(duration_min as i64),
        end_time: end,
        initial_level_cm: initial,
        target_level_cm: target,
        achieved_level_cm: target - 0.2,
        total_duration_min: duration_min,
        water_volume_liters: 90_000.0,
        avg_flow_rate_cm_per_min: flow,
        efficiency_score: efficiency,
    }
}

const CONDITIONS: PredictionConditions = PredictionConditions {
    initial_level_cm: 4.0,
    target_level_cm: 10.0,
};

#[tokio::test]
async fn thin_history_yields_the_default_prediction() {
    let s = setup(2025, 1);
    for days_ago in [10, 20] {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 240.0, 0.025, 0.9))
            .await
            .unwrap();
    }

    let prediction = s
        .learner
        .predict_performance("field-1", CONDITIONS)
        .await
        .unwrap();

    // 6cm of depth at the default fill rate of one hour per cm
    assert!((prediction.estimated_duration_min - 360.0).abs() < 1e-9);
    assert!((prediction.expected_flow_rate_cm_per_min - 1.0 / 60.0).abs() < 1e-9);
    assert!((prediction.confidence - 0.3).abs() < 1e-9);
    assert_eq!(prediction.sample_count, 2);
}

#[tokio::test]
async fn similar_history_drives_the_prediction_with_dry_season_multiplier() {
    let s = setup(2025, 1); // January: dry season
    for days_ago in 1..=6 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 240.0, 0.025, 1.0))
            .await
            .unwrap();
    }

    let prediction = s
        .learner
        .predict_performance("field-1", CONDITIONS)
        .await
        .unwrap();

    assert_eq!(prediction.season, Season::Dry);
    assert_eq!(prediction.sample_count, 6);
    // Identical 240-minute runs, scaled by the 1.2 dry-season multiplier
    assert!((prediction.estimated_duration_min - 288.0).abs() < 1e-6);
    assert!((prediction.expected_flow_rate_cm_per_min - 0.025).abs() < 1e-9);
    // Zero spread: the confidence interval collapses onto the estimate
    assert!((prediction.duration_ci_95_min.0 - 288.0).abs() < 1e-6);
    assert!((prediction.duration_ci_95_min.1 - 288.0).abs() < 1e-6);
    assert!(prediction.confidence > 0.5);
}

#[tokio::test]
async fn wet_season_shortens_the_duration_estimate() {
    let s = setup(2025, 7); // July: wet season
    for days_ago in 1..=6 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 240.0, 0.025, 1.0))
            .await
            .unwrap();
    }

    let prediction = s
        .learner
        .predict_performance("field-1", CONDITIONS)
        .await
        .unwrap();
    assert_eq!(prediction.season, Season::Wet);
    assert!((prediction.estimated_duration_min - 216.0).abs() < 1e-6);
}

#[tokio::test]
async fn dissimilar_and_inefficient_records_are_ignored() {
    let s = setup(2025, 1);
    // Wrong starting point
    for days_ago in 1..=3 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 12.0, 18.0, 240.0, 0.025, 0.9))
            .await
            .unwrap();
    }
    // Right levels but poor efficiency
    for days_ago in 4..=7 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 900.0, 0.007, 0.3))
            .await
            .unwrap();
    }

    let prediction = s
        .learner
        .predict_performance("field-1", CONDITIONS)
        .await
        .unwrap();
    // Nothing qualified: back to the default
    assert!((prediction.confidence - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn optimal_parameters_fall_back_without_history() {
    let s = setup(2025, 1);
    let params = s.learner.optimal_parameters("field-1").await.unwrap();
    assert!(!params.derived_from_history);
    assert_eq!(params.sensor_check_interval_sec, 300);
    assert!((params.min_flow_rate_threshold_cm_per_min - 0.05).abs() < 1e-9);
    assert_eq!(params.max_duration_min, 1_440);
    assert!((params.tolerance_cm - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn optimal_parameters_derive_from_efficient_runs() {
    let s = setup(2025, 1);
    for days_ago in 1..=6 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 240.0, 0.05, 0.9))
            .await
            .unwrap();
    }

    let params = s.learner.optimal_parameters("field-1").await.unwrap();
    assert!(params.derived_from_history);
    // 240 minute average sits in the middle interval band
    assert_eq!(params.sensor_check_interval_sec, 300);
    // 80% of the slowest sustained flow
    assert!((params.min_flow_rate_threshold_cm_per_min - 0.04).abs() < 1e-9);
    // No spread: budget equals the average
    assert_eq!(params.max_duration_min, 240);
    assert!((params.tolerance_cm - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn frequent_anomalies_tighten_the_tolerance() {
    let s = setup(2025, 1);
    for days_ago in 1..=6 {
        s.store
            .append_performance(&record(&s.clock, days_ago, 4.0, 10.0, 240.0, 0.05, 0.9))
            .await
            .unwrap();
    }
    for i in 0..6 {
        s.store
            .append_anomaly(
                Uuid::new_v4(),
                "field-1",
                &Anomaly {
                    kind: AnomalyKind::LowFlow,
                    severity: AnomalySeverity::Warning,
                    description: "slow fill".into(),
                    metrics: serde_json::json!({}),
                    detected_at: s.clock.now() - Duration::days(i),
                },
            )
            .await
            .unwrap();
    }

    let params = s.learner.optimal_parameters("field-1").await.unwrap();
    assert!((params.tolerance_cm - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn patterns_flag_erratic_flow_from_stored_history() {
    let s = setup(2025, 1);
    let flows = [0.01, 0.09, 0.02, 0.08, 0.01, 0.09, 0.02];
    for (i, flow) in flows.iter().enumerate() {
        s.store
            .append_performance(&record(
                &s.clock,
                i as i64 + 1,
                4.0,
                10.0,
                240.0,
                *flow,
                0.9,
            ))
            .await
            .unwrap();
    }

    let patterns = s.learner.patterns("field-1").await.unwrap();
    assert!(patterns
        .iter()
        .any(|p| p.kind == paddi_os::types::PatternKind::HighFlowVariability));
}
