//! Control decision and notification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::learning::PerformancePrediction;

/// Priority of an operator notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

/// What a notification is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The field moved (or is about to move) to a new calendar phase
    PhaseChange,
    /// The current phase calls for fertilizer application
    Fertilizer,
    /// Moisture dropped below the critical threshold during drying
    Emergency,
}

/// An operator-facing notification attached to a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub message: String,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        priority: NotificationPriority,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            priority,
            message: message.into(),
        }
    }
}

/// The action selected by the decision engine for a field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    StartIrrigation {
        target_level_cm: f64,
        #[serde(default)]
        estimated_duration_min: Option<f64>,
        #[serde(default)]
        prediction: Option<PerformancePrediction>,
    },
    StopIrrigation {
        reason: String,
    },
    Maintain {
        reason: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    Notify {
        notification: Notification,
    },
}

impl ControlAction {
    /// Short name for events and logs
    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::StartIrrigation { .. } => "start_irrigation",
            ControlAction::StopIrrigation { .. } => "stop_irrigation",
            ControlAction::Maintain { .. } => "maintain",
            ControlAction::Notify { .. } => "notify",
        }
    }
}

/// A complete per-field control decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDecision {
    pub field_id: String,
    pub action: ControlAction,
    pub reason: String,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    pub decided_at: DateTime<Utc>,
}
