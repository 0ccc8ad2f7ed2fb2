//! Repository traits over the controller's persistent tables
//!
//! Each operation is its own transaction; callers decide whether to retry.
//! Implementations must never swallow failures silently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::StorageError;
use crate::types::{
    Anomaly, FieldRecord, GateCommandRecord, IrrigationSchedule, MonitoringSample,
    PerformanceRecord,
};

/// `field_configurations` and `field_gate_mapping`
#[async_trait]
pub trait FieldRepository: Send + Sync {
    async fn fetch(&self, field_id: &str) -> Result<Option<FieldRecord>, StorageError>;

    /// Insert or replace the per-field row
    async fn upsert(&self, record: &FieldRecord) -> Result<(), StorageError>;

    async fn set_active(&self, field_id: &str, active: bool) -> Result<(), StorageError>;

    /// Canal station controlling this field's branch, if mapped
    async fn station_for(&self, field_id: &str) -> Result<Option<String>, StorageError>;

    async fn map_station(&self, field_id: &str, station_code: &str) -> Result<(), StorageError>;
}

/// `irrigation_schedules`, `irrigation_monitoring`, `irrigation_anomalies`,
/// and `irrigation_performance`
#[async_trait]
pub trait IrrigationRepository: Send + Sync {
    async fn insert_schedule(&self, schedule: &IrrigationSchedule) -> Result<(), StorageError>;

    async fn update_schedule(&self, schedule: &IrrigationSchedule) -> Result<(), StorageError>;

    async fn schedule(&self, id: Uuid) -> Result<Option<IrrigationSchedule>, StorageError>;

    /// The schedule currently holding a field, if any
    async fn active_schedule_for(
        &self,
        field_id: &str,
    ) -> Result<Option<IrrigationSchedule>, StorageError>;

    async fn recent_schedules(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<IrrigationSchedule>, StorageError>;

    async fn append_sample(&self, sample: &MonitoringSample) -> Result<(), StorageError>;

    async fn samples_for(
        &self,
        schedule_id: Uuid,
    ) -> Result<Vec<MonitoringSample>, StorageError>;

    async fn append_anomaly(
        &self,
        schedule_id: Uuid,
        field_id: &str,
        anomaly: &Anomaly,
    ) -> Result<(), StorageError>;

    async fn anomalies_since(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>, StorageError>;

    /// Insertion must follow the schedule's `completed` update (§ concurrency
    /// policy); the runner upholds the ordering, the store just persists.
    async fn append_performance(&self, record: &PerformanceRecord) -> Result<(), StorageError>;

    async fn performance_since(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StorageError>;
}

/// `scada_command_log`
#[async_trait]
pub trait GateCommandLog: Send + Sync {
    async fn record(&self, command: &GateCommandRecord) -> Result<(), StorageError>;

    async fn get(&self, command_id: &str) -> Result<Option<GateCommandRecord>, StorageError>;

    async fn mark_completed(
        &self,
        command_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Commands still in `sent` state issued at or after `since`
    async fn open_commands_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<GateCommandRecord>, StorageError>;
}
