//! Anomaly types raised during irrigation monitoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of anomaly observed in the monitoring sample stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Rise rate positive but below the minimum flow threshold
    LowFlow,
    /// No meaningful rise across consecutive samples
    NoRise,
    /// Water level dropped sharply between samples
    RapidDrop,
    /// A sample could not be obtained from the level sensor
    SensorFailure,
    /// Water level climbed past the overflow ceiling
    OverflowRisk,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::LowFlow => write!(f, "low_flow"),
            AnomalyKind::NoRise => write!(f, "no_rise"),
            AnomalyKind::RapidDrop => write!(f, "rapid_drop"),
            AnomalyKind::SensorFailure => write!(f, "sensor_failure"),
            AnomalyKind::OverflowRisk => write!(f, "overflow_risk"),
        }
    }
}

/// Whether the run must terminate or may continue with corrective action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Warning => write!(f, "WARNING"),
            AnomalySeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A detected anomaly with the metrics that triggered it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub description: String,
    /// Trigger values (levels, flow rates, counts) for diagnostics
    pub metrics: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn is_critical(&self) -> bool {
        self.severity == AnomalySeverity::Critical
    }
}
