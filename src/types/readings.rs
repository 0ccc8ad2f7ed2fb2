//! Sensor and weather observation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a water level observation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// Direct reading from a field water level sensor
    Sensor,
    /// GIS-derived estimate for fields without a sensor
    Gis,
}

/// A water level observation for a field
///
/// Negative `water_level_cm` denotes depth below the soil surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterLevelReading {
    pub time: DateTime<Utc>,
    pub sensor_id: Option<String>,
    pub field_id: String,
    pub water_level_cm: f64,
    pub source: LevelSource,
}

/// A soil moisture observation for a field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoistureReading {
    pub time: DateTime<Utc>,
    pub sensor_id: Option<String>,
    pub field_id: String,
    pub moisture_percent: f64,
    pub depth_cm: f64,
}

/// A single forecast entry accompanying a rainfall observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainfallForecast {
    pub time: DateTime<Utc>,
    pub amount_mm: f64,
}

/// Observed (or forecast-derived) rainfall for a field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainfallData {
    pub field_id: String,
    pub amount_mm: f64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub forecast: Vec<RainfallForecast>,
}

/// Temperature and humidity snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature_c: f64,
    pub humidity_percent: f64,
}

/// Why the composite sensor check did (or did not) flag an irrigation need
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NeedReason {
    /// Water level fell to or below the AWD refill threshold
    WaterLevelThreshold,
    /// Soil moisture fell below the refill threshold
    MoistureThreshold,
    /// The field has been drying longer than the permitted window
    DryingDaysExceeded,
    /// All readings within thresholds; no irrigation needed
    WithinThresholds,
}

impl std::fmt::Display for NeedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeedReason::WaterLevelThreshold => write!(f, "water_level_threshold"),
            NeedReason::MoistureThreshold => write!(f, "moisture_threshold"),
            NeedReason::DryingDaysExceeded => write!(f, "drying_days_exceeded"),
            NeedReason::WithinThresholds => write!(f, "within_thresholds"),
        }
    }
}

/// Composite irrigation-need assessment from the sensor gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigationNeed {
    pub needs_irrigation: bool,
    pub reason: NeedReason,
    /// The readings the assessment was based on, for decision metadata
    pub data: serde_json::Value,
}
