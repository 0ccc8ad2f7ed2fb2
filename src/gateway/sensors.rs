//! Sensor and weather gateway
//!
//! Read-only facade over the sensor-data and weather services. Readings are
//! cached short-term; a field without a level sensor falls back to the
//! GIS-derived estimate (flagged `source = gis`), and nothing is ever
//! fabricated: a failed weather read comes back as absent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::defaults::{
    AWD_REFILL_THRESHOLD_CM, HTTP_TIMEOUT_SECS, MAX_DRYING_DAYS, MOISTURE_NEED_THRESHOLD_PERCENT,
    RAINFALL_CACHE_TTL_SECS, SENSOR_CACHE_TTL_SECS, WATER_LEVEL_CACHE_TTL_SECS,
};
use crate::config::EndpointConfig;
use crate::error::ControlError;
use crate::store::{keys, read_json, write_json, IrrigationRepository, KvCache};
use crate::types::{
    IrrigationNeed, LevelSource, MoistureReading, NeedReason, RainfallData, WaterLevelReading,
    WeatherSnapshot,
};

/// Read-only access to field sensors and weather
#[async_trait]
pub trait SensorGateway: Send + Sync {
    /// Most recent water level: sensor reading, or GIS estimate for fields
    /// without a sensor. Errors only when neither source has data.
    async fn current_water_level(&self, field_id: &str)
        -> Result<WaterLevelReading, ControlError>;

    /// Absent when the field has no moisture sensor
    async fn current_moisture(
        &self,
        field_id: &str,
    ) -> Result<Option<MoistureReading>, ControlError>;

    /// Observed or forecast rainfall in mm
    async fn current_rainfall(&self, field_id: &str) -> Result<RainfallData, ControlError>;

    /// Absent on provider error; never fabricated
    async fn current_weather(
        &self,
        field_id: &str,
    ) -> Result<Option<WeatherSnapshot>, ControlError>;

    /// Compose readings into an irrigation-need assessment
    async fn check_irrigation_need(&self, field_id: &str)
        -> Result<IrrigationNeed, ControlError>;
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
struct WaterLevelDto {
    time: DateTime<Utc>,
    #[serde(default)]
    sensor_id: Option<String>,
    water_level_cm: f64,
}

#[derive(Debug, Deserialize)]
struct GisEstimateDto {
    time: DateTime<Utc>,
    water_level_cm: f64,
}

#[derive(Debug, Deserialize)]
struct MoistureDto {
    time: DateTime<Utc>,
    #[serde(default)]
    sensor_id: Option<String>,
    moisture_percent: f64,
    #[serde(default)]
    depth_cm: f64,
}

#[derive(Debug, Deserialize)]
struct RainfallDto {
    amount_mm: f64,
    time: DateTime<Utc>,
    #[serde(default)]
    forecast: Vec<RainfallForecastDto>,
}

#[derive(Debug, Deserialize)]
struct RainfallForecastDto {
    time: DateTime<Utc>,
    amount_mm: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherDto {
    temperature_c: f64,
    humidity_percent: f64,
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Gateway over the sensor-data and weather HTTP services
pub struct HttpSensorGateway {
    http: reqwest::Client,
    sensor_url: String,
    weather_url: String,
    cache: Arc<dyn KvCache>,
    irrigation: Arc<dyn IrrigationRepository>,
    clock: Arc<dyn Clock>,
}

impl HttpSensorGateway {
    pub fn new(
        sensor_data: &EndpointConfig,
        weather: &EndpointConfig,
        cache: Arc<dyn KvCache>,
        irrigation: Arc<dyn IrrigationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            sensor_url: sensor_data.base_url.trim_end_matches('/').to_string(),
            weather_url: weather.base_url.trim_end_matches('/').to_string(),
            cache,
            irrigation,
            clock,
        }
    }

    /// GET a JSON resource, mapping 404 to `None`
    async fn fetch_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
    ) -> Result<Option<T>, ControlError> {
        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| ControlError::Upstream(e.to_string()))?;
        Ok(Some(response.json().await?))
    }

    /// Days the field has been without standing water, judged from the most
    /// recent finished irrigation
    async fn days_since_last_irrigation(&self, field_id: &str) -> Option<i64> {
        let recent = self.irrigation.recent_schedules(field_id, 1).await.ok()?;
        let last = recent.first()?;
        let reference = last.actual_end.unwrap_or(last.scheduled_start);
        Some((self.clock.now() - reference).num_days())
    }
}

#[async_trait]
impl SensorGateway for HttpSensorGateway {
    async fn current_water_level(
        &self,
        field_id: &str,
    ) -> Result<WaterLevelReading, ControlError> {
        let cache_key = keys::water_level(field_id);
        if let Some(reading) =
            read_json::<WaterLevelReading>(self.cache.as_ref(), &cache_key).await
        {
            return Ok(reading);
        }

        let sensor_url = format!(
            "{}/api/v1/fields/{field_id}/water-level/latest",
            self.sensor_url
        );
        let reading = match self.fetch_optional::<WaterLevelDto>(sensor_url).await? {
            Some(dto) => WaterLevelReading {
                time: dto.time,
                sensor_id: dto.sensor_id,
                field_id: field_id.to_string(),
                water_level_cm: dto.water_level_cm,
                source: LevelSource::Sensor,
            },
            None => {
                // No level sensor on this field: ask for the GIS estimate
                debug!(field_id, "No sensor level, falling back to GIS estimate");
                let gis_url = format!(
                    "{}/api/v1/fields/{field_id}/water-level/gis-estimate",
                    self.sensor_url
                );
                let dto = self
                    .fetch_optional::<GisEstimateDto>(gis_url)
                    .await?
                    .ok_or_else(|| ControlError::SensorUnavailable {
                        field_id: field_id.to_string(),
                        detail: "no sensor reading and no GIS estimate".to_string(),
                    })?;
                WaterLevelReading {
                    time: dto.time,
                    sensor_id: None,
                    field_id: field_id.to_string(),
                    water_level_cm: dto.water_level_cm,
                    source: LevelSource::Gis,
                }
            }
        };

        write_json(
            self.cache.as_ref(),
            &cache_key,
            &reading,
            Some(Duration::from_secs(WATER_LEVEL_CACHE_TTL_SECS)),
        )
        .await;
        Ok(reading)
    }

    async fn current_moisture(
        &self,
        field_id: &str,
    ) -> Result<Option<MoistureReading>, ControlError> {
        let cache_key = keys::moisture(field_id);
        if let Some(reading) =
            read_json::<MoistureReading>(self.cache.as_ref(), &cache_key).await
        {
            return Ok(Some(reading));
        }

        let url = format!(
            "{}/api/v1/fields/{field_id}/moisture/latest",
            self.sensor_url
        );
        let Some(dto) = self.fetch_optional::<MoistureDto>(url).await? else {
            return Ok(None);
        };

        let reading = MoistureReading {
            time: dto.time,
            sensor_id: dto.sensor_id,
            field_id: field_id.to_string(),
            moisture_percent: dto.moisture_percent,
            depth_cm: dto.depth_cm,
        };
        write_json(
            self.cache.as_ref(),
            &cache_key,
            &reading,
            Some(Duration::from_secs(SENSOR_CACHE_TTL_SECS)),
        )
        .await;
        Ok(Some(reading))
    }

    async fn current_rainfall(&self, field_id: &str) -> Result<RainfallData, ControlError> {
        let cache_key = keys::rainfall(field_id);
        if let Some(data) = read_json::<RainfallData>(self.cache.as_ref(), &cache_key).await {
            return Ok(data);
        }

        let url = format!(
            "{}/api/v1/fields/{field_id}/rainfall/current",
            self.weather_url
        );
        let dto = self
            .fetch_optional::<RainfallDto>(url)
            .await?
            .ok_or_else(|| {
                ControlError::Upstream(format!("no rainfall data for field {field_id}"))
            })?;

        let data = RainfallData {
            field_id: field_id.to_string(),
            amount_mm: dto.amount_mm,
            time: dto.time,
            forecast: dto
                .forecast
                .into_iter()
                .map(|f| crate::types::RainfallForecast {
                    time: f.time,
                    amount_mm: f.amount_mm,
                })
                .collect(),
        };
        write_json(
            self.cache.as_ref(),
            &cache_key,
            &data,
            Some(Duration::from_secs(RAINFALL_CACHE_TTL_SECS)),
        )
        .await;
        Ok(data)
    }

    async fn current_weather(
        &self,
        field_id: &str,
    ) -> Result<Option<WeatherSnapshot>, ControlError> {
        let cache_key = keys::weather(field_id);
        if let Some(snapshot) =
            read_json::<WeatherSnapshot>(self.cache.as_ref(), &cache_key).await
        {
            return Ok(Some(snapshot));
        }

        let url = format!(
            "{}/api/v1/fields/{field_id}/weather/current",
            self.weather_url
        );
        // Provider errors yield absent weather, never synthetic values
        let dto: Option<WeatherDto> = match self.fetch_optional(url).await {
            Ok(dto) => dto,
            Err(e) => {
                warn!(field_id, error = %e, "Weather provider error, treating as absent");
                None
            }
        };

        let Some(dto) = dto else { return Ok(None) };
        let snapshot = WeatherSnapshot {
            temperature_c: dto.temperature_c,
            humidity_percent: dto.humidity_percent,
        };
        write_json(
            self.cache.as_ref(),
            &cache_key,
            &snapshot,
            Some(Duration::from_secs(SENSOR_CACHE_TTL_SECS)),
        )
        .await;
        Ok(Some(snapshot))
    }

    async fn check_irrigation_need(
        &self,
        field_id: &str,
    ) -> Result<IrrigationNeed, ControlError> {
        let level = self.current_water_level(field_id).await?;
        let moisture = self.current_moisture(field_id).await?;
        let drying_days = self.days_since_last_irrigation(field_id).await;

        let data = serde_json::json!({
            "water_level_cm": level.water_level_cm,
            "level_source": level.source,
            "moisture_percent": moisture.as_ref().map(|m| m.moisture_percent),
            "days_since_last_irrigation": drying_days,
        });

        let (needs_irrigation, reason) = if level.water_level_cm <= AWD_REFILL_THRESHOLD_CM {
            (true, NeedReason::WaterLevelThreshold)
        } else if moisture
            .as_ref()
            .is_some_and(|m| m.moisture_percent < MOISTURE_NEED_THRESHOLD_PERCENT)
        {
            (true, NeedReason::MoistureThreshold)
        } else if drying_days.is_some_and(|days| days > MAX_DRYING_DAYS) {
            (true, NeedReason::DryingDaysExceeded)
        } else {
            (false, NeedReason::WithinThresholds)
        };

        Ok(IrrigationNeed {
            needs_irrigation,
            reason,
            data,
        })
    }
}
