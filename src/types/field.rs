//! Field types: PlantingMethod, GrowthPhase, FieldConfig

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the rice crop was established in the field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlantingMethod {
    /// Seedlings raised in a nursery and transplanted (14-week calendar)
    Transplanted,
    /// Seed broadcast or drilled directly into the field (15-week calendar)
    DirectSeeded,
}

impl std::fmt::Display for PlantingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlantingMethod::Transplanted => write!(f, "transplanted"),
            PlantingMethod::DirectSeeded => write!(f, "direct-seeded"),
        }
    }
}

/// Stage of the AWD calendar the field is currently in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPhase {
    /// Land soaking, puddling, and levelling before establishment
    #[default]
    Preparation,
    /// Flooded phase: hold standing water at the phase target depth
    Wetting,
    /// Controlled drying: let the field drain below the soil surface
    Drying,
    /// Terminal drainage and harvest
    Harvest,
}

impl std::fmt::Display for GrowthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrowthPhase::Preparation => write!(f, "preparation"),
            GrowthPhase::Wetting => write!(f, "wetting"),
            GrowthPhase::Drying => write!(f, "drying"),
            GrowthPhase::Harvest => write!(f, "harvest"),
        }
    }
}

/// Persistent per-field row, as stored in `field_configurations`
///
/// `current_week`/`current_phase` are snapshots maintained by the decision
/// path's phase advancement; [`FieldConfig`] is the enriched view handed to
/// the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    pub field_id: String,
    pub planting_method: PlantingMethod,
    pub start_date: DateTime<Utc>,
    pub current_week: u32,
    pub current_phase: GrowthPhase,
    pub target_water_level_cm: f64,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Cached per-field configuration consumed by the decision engine
///
/// Derived from [`FieldRecord`] plus the schedule catalog. Lifecycle:
/// created by `initialize`, mutated by the decision path's `advance`,
/// removed only on explicit deactivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub field_id: String,
    pub planting_method: PlantingMethod,
    pub start_date: DateTime<Utc>,
    pub current_week: u32,
    pub current_phase: GrowthPhase,
    pub next_phase_date: DateTime<Utc>,
    pub is_active: bool,
    /// Whether a recent rainfall observation exists for this field
    pub has_rainfall_data: bool,
    /// Target above-soil depth (cm) for the current phase; negative values
    /// denote depth below the soil surface during drying
    pub target_water_level_cm: f64,
}
