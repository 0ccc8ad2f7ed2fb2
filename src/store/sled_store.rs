//! Embedded sled-backed implementation of the repository traits
//!
//! One tree per table. Time-series trees (monitoring, anomalies,
//! performance) key entries as `owner \0 timestamp_be` so prefix scans come
//! back in chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::repository::{FieldRepository, GateCommandLog, IrrigationRepository};
use super::StorageError;
use crate::types::{
    Anomaly, CommandState, FieldRecord, GateCommandRecord, IrrigationSchedule, MonitoringSample,
    PerformanceRecord, ScheduleStatus,
};

/// Anomalies are stored with their schedule for later correlation
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredAnomaly {
    schedule_id: Uuid,
    anomaly: Anomaly,
}

/// Sled-backed store covering every repository trait
#[derive(Clone)]
pub struct SledStore {
    fields: sled::Tree,
    gate_mapping: sled::Tree,
    schedules: sled::Tree,
    active_index: sled::Tree,
    monitoring: sled::Tree,
    anomalies: sled::Tree,
    performance: sled::Tree,
    command_log: sled::Tree,
    _db: Arc<sled::Db>,
}

impl SledStore {
    /// Open or create the store under the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            fields: db.open_tree("field_configurations")?,
            gate_mapping: db.open_tree("field_gate_mapping")?,
            schedules: db.open_tree("irrigation_schedules")?,
            active_index: db.open_tree("active_irrigations")?,
            monitoring: db.open_tree("irrigation_monitoring")?,
            anomalies: db.open_tree("irrigation_anomalies")?,
            performance: db.open_tree("irrigation_performance")?,
            command_log: db.open_tree("scada_command_log")?,
            _db: Arc::new(db),
        })
    }

    /// Flush pending writes; sled otherwise flushes in the background
    pub fn flush(&self) -> Result<(), StorageError> {
        self._db.flush()?;
        Ok(())
    }

    /// `owner \0 timestamp_be` composite key for time-series trees
    fn series_key(owner: &[u8], at: DateTime<Utc>) -> Vec<u8> {
        let ts = at.timestamp_millis().max(0) as u64;
        let mut key = Vec::with_capacity(owner.len() + 9);
        key.extend_from_slice(owner);
        key.push(0);
        key.extend_from_slice(&ts.to_be_bytes());
        key
    }

    fn series_prefix(owner: &[u8]) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(owner.len() + 1);
        prefix.extend_from_slice(owner);
        prefix.push(0);
        prefix
    }

    fn scan_series<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        owner: &[u8],
    ) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(Self::series_prefix(owner)) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl FieldRepository for SledStore {
    async fn fetch(&self, field_id: &str) -> Result<Option<FieldRecord>, StorageError> {
        match self.fields.get(field_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &FieldRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        self.fields.insert(record.field_id.as_bytes(), value)?;
        Ok(())
    }

    async fn set_active(&self, field_id: &str, active: bool) -> Result<(), StorageError> {
        let mut record = self.fetch(field_id).await?.ok_or(StorageError::NotFound {
            entity: "field_configuration",
            key: field_id.to_string(),
        })?;
        record.active = active;
        self.upsert(&record).await
    }

    async fn station_for(&self, field_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .gate_mapping
            .get(field_id.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn map_station(&self, field_id: &str, station_code: &str) -> Result<(), StorageError> {
        self.gate_mapping
            .insert(field_id.as_bytes(), station_code.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl IrrigationRepository for SledStore {
    async fn insert_schedule(&self, schedule: &IrrigationSchedule) -> Result<(), StorageError> {
        let value = serde_json::to_vec(schedule)?;
        self.schedules.insert(schedule.id.as_bytes(), value)?;
        if schedule.status == ScheduleStatus::Active {
            self.active_index
                .insert(schedule.field_id.as_bytes(), schedule.id.as_bytes())?;
        }
        Ok(())
    }

    async fn update_schedule(&self, schedule: &IrrigationSchedule) -> Result<(), StorageError> {
        let value = serde_json::to_vec(schedule)?;
        self.schedules.insert(schedule.id.as_bytes(), value)?;
        // Keep the per-field active index consistent with the status flip
        if schedule.status == ScheduleStatus::Active {
            self.active_index
                .insert(schedule.field_id.as_bytes(), schedule.id.as_bytes())?;
        } else if let Some(current) = self.active_index.get(schedule.field_id.as_bytes())? {
            if current.as_ref() == schedule.id.as_bytes() {
                self.active_index.remove(schedule.field_id.as_bytes())?;
            }
        }
        Ok(())
    }

    async fn schedule(&self, id: Uuid) -> Result<Option<IrrigationSchedule>, StorageError> {
        match self.schedules.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn active_schedule_for(
        &self,
        field_id: &str,
    ) -> Result<Option<IrrigationSchedule>, StorageError> {
        let Some(id_bytes) = self.active_index.get(field_id.as_bytes())? else {
            return Ok(None);
        };
        let Some(bytes) = self.schedules.get(&id_bytes)? else {
            return Ok(None);
        };
        let schedule: IrrigationSchedule = serde_json::from_slice(&bytes)?;
        if schedule.status == ScheduleStatus::Active {
            Ok(Some(schedule))
        } else {
            Ok(None)
        }
    }

    async fn recent_schedules(
        &self,
        field_id: &str,
        limit: usize,
    ) -> Result<Vec<IrrigationSchedule>, StorageError> {
        let mut all: Vec<IrrigationSchedule> = Vec::new();
        for item in self.schedules.iter() {
            let (_, value) = item?;
            let schedule: IrrigationSchedule = serde_json::from_slice(&value)?;
            if schedule.field_id == field_id {
                all.push(schedule);
            }
        }
        all.sort_by_key(|s| std::cmp::Reverse(s.scheduled_start));
        all.truncate(limit);
        Ok(all)
    }

    async fn append_sample(&self, sample: &MonitoringSample) -> Result<(), StorageError> {
        let key = Self::series_key(sample.schedule_id.as_bytes(), sample.time);
        let value = serde_json::to_vec(sample)?;
        self.monitoring.insert(key, value)?;
        Ok(())
    }

    async fn samples_for(
        &self,
        schedule_id: Uuid,
    ) -> Result<Vec<MonitoringSample>, StorageError> {
        Self::scan_series(&self.monitoring, schedule_id.as_bytes())
    }

    async fn append_anomaly(
        &self,
        schedule_id: Uuid,
        field_id: &str,
        anomaly: &Anomaly,
    ) -> Result<(), StorageError> {
        let key = Self::series_key(field_id.as_bytes(), anomaly.detected_at);
        let stored = StoredAnomaly {
            schedule_id,
            anomaly: anomaly.clone(),
        };
        self.anomalies.insert(key, serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    async fn anomalies_since(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>, StorageError> {
        let stored: Vec<StoredAnomaly> = Self::scan_series(&self.anomalies, field_id.as_bytes())?;
        Ok(stored
            .into_iter()
            .map(|s| s.anomaly)
            .filter(|a| a.detected_at >= since)
            .collect())
    }

    async fn append_performance(&self, record: &PerformanceRecord) -> Result<(), StorageError> {
        let key = Self::series_key(record.field_id.as_bytes(), record.end_time);
        self.performance.insert(key, serde_json::to_vec(record)?)?;
        Ok(())
    }

    async fn performance_since(
        &self,
        field_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StorageError> {
        let records: Vec<PerformanceRecord> =
            Self::scan_series(&self.performance, field_id.as_bytes())?;
        Ok(records.into_iter().filter(|r| r.end_time >= since).collect())
    }
}

#[async_trait]
impl GateCommandLog for SledStore {
    async fn record(&self, command: &GateCommandRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(command)?;
        self.command_log
            .insert(command.command_id.as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, command_id: &str) -> Result<Option<GateCommandRecord>, StorageError> {
        match self.command_log.get(command_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn mark_completed(
        &self,
        command_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut command = self.get(command_id).await?.ok_or(StorageError::NotFound {
            entity: "scada_command",
            key: command_id.to_string(),
        })?;
        command.status = CommandState::Completed;
        command.completed_at = Some(at);
        self.record(&command).await
    }

    async fn open_commands_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<GateCommandRecord>, StorageError> {
        let mut open = Vec::new();
        for item in self.command_log.iter() {
            let (_, value) = item?;
            let command: GateCommandRecord = serde_json::from_slice(&value)?;
            if command.status == CommandState::Sent && command.command_time >= since {
                open.push(command);
            }
        }
        open.sort_by_key(|c| c.command_time);
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GrowthPhase, PlantingMethod};
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    fn schedule(field_id: &str, status: ScheduleStatus) -> IrrigationSchedule {
        IrrigationSchedule {
            id: Uuid::new_v4(),
            field_id: field_id.to_string(),
            scheduled_start: Utc::now(),
            initial_level_cm: 4.0,
            target_level_cm: 10.0,
            status,
            actual_end: None,
            final_level_cm: None,
            water_volume_liters: None,
            avg_flow_rate_cm_per_min: None,
        }
    }

    #[tokio::test]
    async fn field_record_round_trip() {
        let (_dir, store) = store();
        let record = FieldRecord {
            field_id: "field-7".into(),
            planting_method: PlantingMethod::Transplanted,
            start_date: Utc::now(),
            current_week: 2,
            current_phase: GrowthPhase::Wetting,
            target_water_level_cm: 5.0,
            active: true,
            updated_at: Utc::now(),
        };
        store.upsert(&record).await.unwrap();

        let loaded = store.fetch("field-7").await.unwrap().unwrap();
        assert_eq!(loaded.current_week, 2);
        assert_eq!(loaded.current_phase, GrowthPhase::Wetting);

        store.set_active("field-7", false).await.unwrap();
        assert!(!store.fetch("field-7").await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn active_index_follows_status_transitions() {
        let (_dir, store) = store();
        let mut s = schedule("field-1", ScheduleStatus::Active);
        store.insert_schedule(&s).await.unwrap();

        let active = store.active_schedule_for("field-1").await.unwrap().unwrap();
        assert_eq!(active.id, s.id);

        s.status = ScheduleStatus::Completed;
        s.actual_end = Some(Utc::now());
        store.update_schedule(&s).await.unwrap();

        assert!(store.active_schedule_for("field-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn samples_scan_in_chronological_order() {
        let (_dir, store) = store();
        let s = schedule("field-1", ScheduleStatus::Active);
        store.insert_schedule(&s).await.unwrap();

        let base = Utc::now();
        for (i, level) in [6.0, 9.0, 12.0].iter().enumerate() {
            store
                .append_sample(&MonitoringSample {
                    schedule_id: s.id,
                    field_id: "field-1".into(),
                    time: base + Duration::seconds(300 * i as i64),
                    water_level_cm: *level,
                    flow_rate_cm_per_min: 0.01,
                    sensor_id: None,
                })
                .await
                .unwrap();
        }

        let samples = store.samples_for(s.id).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].water_level_cm, 6.0);
        assert_eq!(samples[2].water_level_cm, 12.0);
    }

    #[tokio::test]
    async fn performance_window_filters_by_end_time() {
        let (_dir, store) = store();
        let now = Utc::now();
        for days_ago in [80, 40, 5] {
            let s = schedule("field-1", ScheduleStatus::Completed);
            store
                .append_performance(&PerformanceRecord {
                    field_id: "field-1".into(),
                    schedule_id: s.id,
                    start_time: now - Duration::days(days_ago) - Duration::hours(4),
                    end_time: now - Duration::days(days_ago),
                    initial_level_cm: 4.0,
                    target_level_cm: 10.0,
                    achieved_level_cm: 9.8,
                    total_duration_min: 240.0,
                    water_volume_liters: 90_000.0,
                    avg_flow_rate_cm_per_min: 0.025,
                    efficiency_score: 1.0,
                })
                .await
                .unwrap();
        }

        let recent = store
            .performance_since("field-1", now - Duration::days(60))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn command_log_marks_completion() {
        let (_dir, store) = store();
        let now = Utc::now();
        let command = GateCommandRecord {
            command_id: "ST-1-1700000000".into(),
            field_id: "field-1".into(),
            station_code: "ST-1".into(),
            gate_level: 4,
            target_flow_rate_m3s: None,
            command_time: now,
            status: CommandState::Sent,
            completed_at: None,
        };
        store.record(&command).await.unwrap();

        let open = store
            .open_commands_since(now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);

        store
            .mark_completed("ST-1-1700000000", now + Duration::minutes(1))
            .await
            .unwrap();
        let open = store
            .open_commands_since(now - Duration::hours(1))
            .await
            .unwrap();
        assert!(open.is_empty());
    }
}
