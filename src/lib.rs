//! PADDI-OS: Paddy AWD Operational Intelligence
//!
//! Closed-loop Alternate Wetting and Drying (AWD) irrigation control for
//! paddy fields.
//!
//! ## Architecture
//!
//! - **Decision engine**: per-field phase/state machine composing the growth
//!   schedule, cached field configuration, sensor readings, rainfall, and
//!   learned parameters into a single control decision
//! - **Irrigation runner**: per-irrigation monitoring loop driving canal
//!   gates against a target water level with anomaly detection and safe
//!   teardown
//! - **Learner**: weighted summaries over historical run performance feeding
//!   predictions and recommended run parameters back into decisions

pub mod api;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod decision;
pub mod detector;
pub mod error;
pub mod events;
pub mod fields;
pub mod gateway;
pub mod learning;
pub mod runner;
pub mod service;
pub mod store;
pub mod types;

// Re-export controller configuration
pub use config::ControllerConfig;

// Re-export commonly used types
pub use types::{
    Anomaly, AnomalyKind, AnomalySeverity, ControlAction, ControlDecision, FieldConfig,
    GateCommand, GateLevel, GrowthPhase, IrrigationConfig, IrrigationSchedule, IrrigationStatus,
    MonitoringSample, Notification, NotificationPriority, PerformancePrediction,
    PerformanceRecord, PlantingMethod, ScheduleStatus, StopReason, WaterLevelReading,
};

// Re-export core services
pub use decision::DecisionEngine;
pub use fields::FieldConfigStore;
pub use learning::Learner;
pub use runner::{ActiveRegistry, IrrigationRunner};
pub use service::ControlService;

// Re-export clock abstraction
pub use clock::{Clock, ManualClock, SystemClock};

// Re-export error taxonomy
pub use error::ControlError;
pub use store::StorageError;
