//! Gate levels and SCADA command types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete opening position of a canal gate
///
/// Level 1 is fully closed; levels 2-4 are increasing openings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum GateLevel {
    Closed,
    Low,
    Medium,
    High,
}

impl GateLevel {
    /// Wire value for the actuator API (1 = closed .. 4 = fully open)
    pub fn as_u8(self) -> u8 {
        match self {
            GateLevel::Closed => 1,
            GateLevel::Low => 2,
            GateLevel::Medium => 3,
            GateLevel::High => 4,
        }
    }

    /// Parse an actuator wire value, clamping out-of-range values to the
    /// nearest valid level
    pub fn from_u8(level: u8) -> Self {
        match level {
            0 | 1 => GateLevel::Closed,
            2 => GateLevel::Low,
            3 => GateLevel::Medium,
            _ => GateLevel::High,
        }
    }

    /// Clamp a hydraulic-collaborator result to an open position (2-4)
    pub fn clamp_open(level: u8) -> Self {
        match level {
            0..=2 => GateLevel::Low,
            3 => GateLevel::Medium,
            _ => GateLevel::High,
        }
    }

    /// Fallback flow-to-level mapping for when the hydraulic collaborator
    /// is unreachable
    pub fn from_flow_rate(target_flow_rate_m3s: f64) -> Self {
        if target_flow_rate_m3s < 5.0 {
            GateLevel::Low
        } else if target_flow_rate_m3s < 10.0 {
            GateLevel::Medium
        } else {
            GateLevel::High
        }
    }
}

impl std::fmt::Display for GateLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A gate command addressed to a canal station
///
/// Commands are idempotent on `(station_code, start_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCommand {
    pub station_code: String,
    pub gate_level: GateLevel,
    pub start_time: DateTime<Utc>,
    pub field_id: String,
    #[serde(default)]
    pub target_flow_rate_m3s: Option<f64>,
}

impl GateCommand {
    /// Idempotency key derived from station and start time
    pub fn command_id(&self) -> String {
        format!("{}-{}", self.station_code, self.start_time.timestamp())
    }
}

/// State of a locally logged gate command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Sent,
    Completed,
    Failed,
}

/// Local `scada_command_log` entry mirroring a forwarded gate command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCommandRecord {
    pub command_id: String,
    pub field_id: String,
    pub station_code: String,
    pub gate_level: u8,
    #[serde(default)]
    pub target_flow_rate_m3s: Option<f64>,
    pub command_time: DateTime<Utc>,
    pub status: CommandState,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Completion status reported by the external actuator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCommandStatus {
    pub complete: bool,
    pub gate_level: u8,
    pub start_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_flow_mapping() {
        assert_eq!(GateLevel::from_flow_rate(0.0), GateLevel::Low);
        assert_eq!(GateLevel::from_flow_rate(4.9), GateLevel::Low);
        assert_eq!(GateLevel::from_flow_rate(5.0), GateLevel::Medium);
        assert_eq!(GateLevel::from_flow_rate(9.9), GateLevel::Medium);
        assert_eq!(GateLevel::from_flow_rate(10.0), GateLevel::High);
        assert_eq!(GateLevel::from_flow_rate(25.0), GateLevel::High);
    }

    #[test]
    fn clamp_open_never_returns_closed() {
        for raw in 0..=10u8 {
            assert!(GateLevel::clamp_open(raw) >= GateLevel::Low);
        }
    }

    #[test]
    fn command_id_is_stable_for_same_station_and_time() {
        let t = DateTime::parse_from_rfc3339("2025-06-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let cmd = GateCommand {
            station_code: "ST-14".into(),
            gate_level: GateLevel::High,
            start_time: t,
            field_id: "field-1".into(),
            target_flow_rate_m3s: None,
        };
        assert_eq!(cmd.command_id(), format!("ST-14-{}", t.timestamp()));
    }
}
