//! System-wide default constants.
//!
//! Centralises tunables for the decision engine, runner, learner, and
//! gateways. None of these change at runtime without a config event.

// ============================================================================
// Decision engine
// ============================================================================

/// Soil moisture (%) below which a drying field triggers an emergency start.
pub const CRITICAL_MOISTURE_THRESHOLD_PERCENT: f64 = 20.0;

/// Rainfall (mm) above which the wetting evaluation considers skipping
/// irrigation.
pub const RAINFALL_THRESHOLD_MM: f64 = 5.0;

/// Target depth (cm) for preparation-phase flooding and emergency rewetting.
pub const PREPARATION_TARGET_LEVEL_CM: f64 = 10.0;

/// Estimated duration (minutes) for a preparation-phase flooding: 48 hours.
pub const PREPARATION_ESTIMATED_DURATION_MIN: f64 = 2_880.0;

/// mm of rainfall per cm of field water level rise.
pub const MM_PER_CM: f64 = 10.0;

// ============================================================================
// Sensor gateway
// ============================================================================

/// Short-term cache TTL for sensor and weather reads (seconds).
pub const SENSOR_CACHE_TTL_SECS: u64 = 300;

/// Water level reads are cached shorter than the monitoring interval so a
/// running irrigation never samples a stale level.
pub const WATER_LEVEL_CACHE_TTL_SECS: u64 = 60;

/// Rainfall cache TTL under `awd:rainfall:{field_id}` (seconds).
pub const RAINFALL_CACHE_TTL_SECS: u64 = 300;

/// Water level (cm below surface) at which AWD calls for refilling.
pub const AWD_REFILL_THRESHOLD_CM: f64 = -15.0;

/// Soil moisture (%) below which the composite check flags a refill need.
pub const MOISTURE_NEED_THRESHOLD_PERCENT: f64 = 30.0;

/// Maximum days a field may keep drying before a refill is flagged.
pub const MAX_DRYING_DAYS: i64 = 7;

// ============================================================================
// Irrigation runner
// ============================================================================

/// Permitted undershoot (cm) from target at which a run completes.
pub const DEFAULT_TOLERANCE_CM: f64 = 1.0;

/// Interval between monitoring samples (seconds).
pub const DEFAULT_SENSOR_CHECK_INTERVAL_SECS: u64 = 300;

/// Maximum run duration (minutes): 24 hours.
pub const DEFAULT_MAX_DURATION_MIN: i64 = 1_440;

/// Minimum acceptable rise rate (cm/min) before low-flow/no-rise checks fire.
pub const DEFAULT_MIN_FLOW_RATE_CM_PER_MIN: f64 = 0.05;

/// Absolute water level (cm) the controller never irrigates past.
pub const DEFAULT_EMERGENCY_STOP_LEVEL_CM: f64 = 15.0;

/// Level drop (cm) between consecutive samples that flags a rapid drop.
pub const RAPID_DROP_THRESHOLD_CM: f64 = 2.0;

/// Margin (cm) above target at which overflow risk is flagged.
pub const OVERFLOW_MARGIN_CM: f64 = 5.0;

/// Consecutive below-threshold samples before no-rise turns critical.
pub const NO_RISE_CRITICAL_COUNT: u32 = 3;

/// Rolling monitoring history kept per run (samples).
pub const MONITORING_HISTORY_LEN: usize = 10;

/// Consecutive tick failures before the run stops with `monitoring_error`.
pub const MAX_CONSECUTIVE_TICK_ERRORS: u32 = 3;

/// How long a teardown waits for gate-close acknowledgment (seconds).
pub const GATE_CLOSE_ACK_TIMEOUT_SECS: u64 = 30;

/// Poll cadence while waiting for gate-close acknowledgment (seconds).
pub const GATE_CLOSE_ACK_POLL_SECS: u64 = 5;

/// Nominal plot area (m^2) used for volume estimates: one rai.
pub const PADDY_FIELD_AREA_M2: f64 = 1_600.0;

// ============================================================================
// Gate actuator
// ============================================================================

/// Cadence of the open-command completion monitor (seconds).
pub const COMMAND_MONITOR_INTERVAL_SECS: u64 = 30;

/// How far back the completion monitor scans for open commands (seconds).
pub const COMMAND_MONITOR_LOOKBACK_SECS: i64 = 3_600;

// ============================================================================
// Learner
// ============================================================================

/// Minimum similar records before a real prediction replaces the default.
pub const MIN_SAMPLES_FOR_PREDICTION: usize = 5;

/// Lookback window for performance predictions (days).
pub const PREDICTION_WINDOW_DAYS: i64 = 90;

/// Lookback window for optimal-parameter derivation (days).
pub const OPTIMAL_WINDOW_DAYS: i64 = 60;

/// Lookback window for flow-variability and anomaly patterns (days).
pub const PATTERN_SHORT_WINDOW_DAYS: i64 = 30;

/// Similarity band on initial level (cm) for record selection.
pub const SIMILAR_INITIAL_BAND_CM: f64 = 3.0;

/// Similarity band on target level (cm) for record selection.
pub const SIMILAR_TARGET_BAND_CM: f64 = 2.0;

/// Default cold-start prediction: minutes per cm of depth to fill.
pub const DEFAULT_FILL_MIN_PER_CM: f64 = 60.0;

/// Cold-start prediction confidence.
pub const DEFAULT_PREDICTION_CONFIDENCE: f64 = 0.3;

/// Cached prediction TTL under `awd:prediction:{field_id}` (seconds).
pub const PREDICTION_CACHE_TTL_SECS: u64 = 86_400;

// ============================================================================
// Efficiency score
// ============================================================================

/// Weight of target accuracy in the efficiency score.
pub const EFFICIENCY_ACCURACY_WEIGHT: f64 = 0.7;

/// Weight of duration efficiency in the efficiency score.
pub const EFFICIENCY_DURATION_WEIGHT: f64 = 0.3;

/// Reference duration (minutes) for full duration credit: 6 hours.
pub const EFFICIENCY_DURATION_REF_MIN: f64 = 360.0;

// ============================================================================
// Caching
// ============================================================================

/// TTL for `irrigation:status:{schedule_id}` and `irrigation:field:{field_id}`
/// cache entries (seconds): 24 hours.
pub const STATUS_CACHE_TTL_SECS: u64 = 86_400;

// ============================================================================
// Event publisher
// ============================================================================

/// How often the uploader task drains the event queue to the broker (seconds).
pub const EVENT_UPLOADER_INTERVAL_SECS: u64 = 15;

/// HTTP client timeout for external collaborators (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;
