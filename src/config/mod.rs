//! Controller configuration
//!
//! Loaded once at startup from a TOML file with environment overrides, then
//! passed explicitly to the process wiring. No global config state.

pub mod defaults;

use std::path::Path;

use serde::{Deserialize, Serialize};

/// External HTTP collaborator endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Bearer token where the collaborator requires one
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Runner parameter overrides applied to every new irrigation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub tolerance_cm: f64,
    pub sensor_check_interval_sec: u64,
    pub max_duration_min: i64,
    pub min_flow_rate_cm_per_min: f64,
    pub emergency_stop_level_cm: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tolerance_cm: defaults::DEFAULT_TOLERANCE_CM,
            sensor_check_interval_sec: defaults::DEFAULT_SENSOR_CHECK_INTERVAL_SECS,
            max_duration_min: defaults::DEFAULT_MAX_DURATION_MIN,
            min_flow_rate_cm_per_min: defaults::DEFAULT_MIN_FLOW_RATE_CM_PER_MIN,
            emergency_stop_level_cm: defaults::DEFAULT_EMERGENCY_STOP_LEVEL_CM,
        }
    }
}

/// Top-level controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// HTTP server bind address
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Directory for the embedded database and event queue
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// SCADA gate actuator API
    #[serde(default)]
    pub scada: EndpointConfig,
    /// Hydraulic gate-level service (Bearer token required)
    #[serde(default)]
    pub hydraulic: EndpointConfig,
    /// Sensor-data service (water level, moisture)
    #[serde(default)]
    pub sensor_data: EndpointConfig,
    /// Weather/rainfall service
    #[serde(default)]
    pub weather: EndpointConfig,
    /// Message broker HTTP bridge for domain events
    #[serde(default)]
    pub broker: EndpointConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

fn default_server_addr() -> String {
    "0.0.0.0:8086".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            data_dir: default_data_dir(),
            scada: EndpointConfig::default(),
            hydraulic: EndpointConfig::default(),
            sensor_data: EndpointConfig::default(),
            weather: EndpointConfig::default(),
            broker: EndpointConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check tunables before the process starts controlling gates.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.runner.tolerance_cm > 0.0,
            "runner.tolerance_cm must be positive"
        );
        anyhow::ensure!(
            self.runner.sensor_check_interval_sec >= 10,
            "runner.sensor_check_interval_sec must be at least 10s"
        );
        anyhow::ensure!(
            self.runner.max_duration_min > 0,
            "runner.max_duration_min must be positive"
        );
        anyhow::ensure!(
            self.runner.min_flow_rate_cm_per_min > 0.0,
            "runner.min_flow_rate_cm_per_min must be positive"
        );
        Ok(())
    }
}
