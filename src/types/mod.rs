//! Shared domain types for the AWD controller
//!
//! Organized by subsystem:
//! - `field`: planting methods, growth phases, per-field configuration
//! - `readings`: sensor and weather observations
//! - `irrigation`: schedules, live status, monitoring samples, performance
//! - `anomaly`: anomaly kinds and severities raised during a run
//! - `decision`: the tagged control decision and notifications
//! - `gate`: gate levels and SCADA commands
//! - `learning`: predictions, recommended parameters, operation patterns

mod anomaly;
mod decision;
mod field;
mod gate;
mod irrigation;
mod learning;
mod readings;

pub use anomaly::{Anomaly, AnomalyKind, AnomalySeverity};
pub use decision::{
    ControlAction, ControlDecision, Notification, NotificationKind, NotificationPriority,
};
pub use field::{FieldConfig, FieldRecord, GrowthPhase, PlantingMethod};
pub use gate::{CommandState, GateCommand, GateCommandRecord, GateCommandStatus, GateLevel};
pub use irrigation::{
    IrrigationConfig, IrrigationSchedule, IrrigationStatus, MonitoringSample, PerformanceRecord,
    ScheduleStatus, StopReason,
};
pub use learning::{
    OperationPattern, OptimalRunParameters, PatternKind, PerformancePrediction, Season,
};
pub use readings::{
    IrrigationNeed, LevelSource, MoistureReading, NeedReason, RainfallData, RainfallForecast,
    WaterLevelReading, WeatherSnapshot,
};
