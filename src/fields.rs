//! Field configuration store
//!
//! Read-through cache over the persistent per-field rows. The decision path
//! is the single writer for any given field; concurrent reads are safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::catalog;
use crate::clock::Clock;
use crate::config::defaults::SENSOR_CACHE_TTL_SECS;
use crate::error::ControlError;
use crate::events::{topics, DomainEvent, EventPublisher};
use crate::store::{keys, read_json, write_json, FieldRepository, KvCache};
use crate::types::{FieldConfig, FieldRecord, PlantingMethod};

/// Cached per-field configuration with calendar-driven phase advancement
pub struct FieldConfigStore {
    repo: Arc<dyn FieldRepository>,
    cache: Arc<dyn KvCache>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl FieldConfigStore {
    pub fn new(
        repo: Arc<dyn FieldRepository>,
        cache: Arc<dyn KvCache>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            cache,
            publisher,
            clock,
        }
    }

    /// Calendar week for a crop started at `start_date`
    fn week_for(&self, start_date: DateTime<Utc>) -> u32 {
        let days = (self.clock.now() - start_date).num_days().max(0);
        (days / 7) as u32
    }

    /// Build the enriched view for a persistent row
    async fn view(&self, record: &FieldRecord) -> FieldConfig {
        let schedule = catalog::schedule_for(record.planting_method);
        let week = self.week_for(record.start_date);
        let phase = schedule.current_phase(week);
        let has_rainfall_data = self
            .cache
            .get(&keys::rainfall(&record.field_id))
            .await
            .is_some();

        FieldConfig {
            field_id: record.field_id.clone(),
            planting_method: record.planting_method,
            start_date: record.start_date,
            current_week: week,
            current_phase: phase.phase,
            next_phase_date: schedule.next_phase_date(record.start_date, week),
            is_active: record.active,
            has_rainfall_data,
            target_water_level_cm: phase.target_water_level_cm,
        }
    }

    /// Read-through lookup: cache first, then the persistent row
    pub async fn get(&self, field_id: &str) -> Result<Option<FieldConfig>, ControlError> {
        let cache_key = keys::field_config(field_id);
        if let Some(config) = read_json::<FieldConfig>(self.cache.as_ref(), &cache_key).await {
            return Ok(Some(config));
        }

        let Some(record) = self.repo.fetch(field_id).await? else {
            return Ok(None);
        };

        let config = self.view(&record).await;
        write_json(
            self.cache.as_ref(),
            &cache_key,
            &config,
            Some(Duration::from_secs(SENSOR_CACHE_TTL_SECS)),
        )
        .await;
        Ok(Some(config))
    }

    /// Register a field for AWD control
    pub async fn initialize(
        &self,
        field_id: &str,
        planting_method: PlantingMethod,
        start_date: DateTime<Utc>,
    ) -> Result<FieldConfig, ControlError> {
        let schedule = catalog::schedule_for(planting_method);
        let week = self.week_for(start_date);
        let phase = schedule.current_phase(week);

        let record = FieldRecord {
            field_id: field_id.to_string(),
            planting_method,
            start_date,
            current_week: week,
            current_phase: phase.phase,
            target_water_level_cm: phase.target_water_level_cm,
            active: true,
            updated_at: self.clock.now(),
        };
        self.repo.upsert(&record).await?;

        let config = self.view(&record).await;
        write_json(
            self.cache.as_ref(),
            &keys::field_config(field_id),
            &config,
            Some(Duration::from_secs(SENSOR_CACHE_TTL_SECS)),
        )
        .await;

        info!(
            field_id,
            method = %planting_method,
            week,
            phase = %phase.phase,
            "Field initialized for AWD control"
        );
        Ok(config)
    }

    /// Advance the field's calendar snapshot if the week changed.
    ///
    /// Persistent row and cache are updated together; exactly one
    /// `phase_change` notification is emitted per real change, so calling
    /// this twice at the same instant is a no-op the second time.
    pub async fn advance(&self, config: &FieldConfig) -> Result<FieldConfig, ControlError> {
        let Some(mut record) = self.repo.fetch(&config.field_id).await? else {
            return Err(ControlError::ConfigMissing(config.field_id.clone()));
        };

        let week = self.week_for(record.start_date);
        if week == record.current_week {
            debug!(field_id = %config.field_id, week, "Phase calendar unchanged");
            return Ok(self.view(&record).await);
        }

        let schedule = catalog::schedule_for(record.planting_method);
        let phase = schedule.current_phase(week);
        let phase_changed = phase.phase != record.current_phase;

        record.current_week = week;
        record.current_phase = phase.phase;
        record.target_water_level_cm = phase.target_water_level_cm;
        record.updated_at = self.clock.now();
        self.repo.upsert(&record).await?;

        let updated = self.view(&record).await;
        write_json(
            self.cache.as_ref(),
            &keys::field_config(&record.field_id),
            &updated,
            Some(Duration::from_secs(SENSOR_CACHE_TTL_SECS)),
        )
        .await;

        info!(
            field_id = %record.field_id,
            week,
            phase = %phase.phase,
            "Field calendar advanced"
        );

        if phase_changed {
            self.publisher.publish(DomainEvent::new(
                topics::ALERT_NOTIFICATIONS,
                "phase_change",
                &record.field_id,
                None,
                serde_json::json!({
                    "priority": "medium",
                    "week": week,
                    "phase": phase.phase,
                    "target_water_level_cm": phase.target_water_level_cm,
                    "description": phase.description,
                }),
                self.clock.now(),
            ));
        }

        Ok(updated)
    }

    /// Take the field out of AWD control
    pub async fn deactivate(&self, field_id: &str) -> Result<(), ControlError> {
        self.repo.set_active(field_id, false).await?;
        self.cache.delete(&keys::field_config(field_id)).await;
        info!(field_id, "Field deactivated");
        Ok(())
    }
}
