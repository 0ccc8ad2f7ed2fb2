//! Error taxonomy for the control loop
//!
//! The decision engine surfaces these to callers. The irrigation runner never
//! lets them escape a monitoring tick; inside the loop they become anomalies,
//! stop reasons, or logged warnings.

use uuid::Uuid;

use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Field was never initialized for AWD control. The decision path maps
    /// this to a `maintain` decision rather than an error response.
    #[error("field {0} has no AWD configuration")]
    ConfigMissing(String),

    /// No usable water level reading could be obtained
    #[error("sensor unavailable for field {field_id}: {detail}")]
    SensorUnavailable { field_id: String, detail: String },

    /// The SCADA actuator rejected or never acknowledged a gate command
    #[error("gate actuator unreachable: {0}")]
    ActuatorUnreachable(String),

    /// No canal station is mapped to the field
    #[error("no gate station mapped for field {0}")]
    StationUnmapped(String),

    /// A start was attempted while another run holds the field
    #[error("field {field_id} already has active irrigation {schedule_id}")]
    AlreadyActive { field_id: String, schedule_id: Uuid },

    /// Hydraulic collaborator failed; callers fall back to the flow table
    #[error("hydraulic service unavailable: {0}")]
    HydraulicUnavailable(String),

    /// Learner could not produce an enrichment; decisions proceed unchanged
    #[error("learner unavailable: {0}")]
    LearnerUnavailable(String),

    /// A request that cannot be honored as posed (e.g. target below the
    /// current level)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Upstream HTTP collaborator failure (sensor-data, weather)
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        ControlError::Upstream(err.to_string())
    }
}
