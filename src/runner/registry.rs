//! Active irrigation registry
//!
//! Process-wide map of field to running irrigation. The claim is the
//! exactly-one-start guarantee: two concurrent starts on one field race on a
//! single atomic entry insert, and the loser gets `AlreadyActive`. The
//! registry owns cancellation handles, not task logic; external observers
//! read, only the runner mutates.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ControlError;

/// Handle to one active irrigation run
#[derive(Clone)]
pub struct RunHandle {
    pub schedule_id: Uuid,
    pub cancel: CancellationToken,
}

/// Tracks at most one active irrigation per field
#[derive(Default)]
pub struct ActiveRegistry {
    runs: DashMap<String, RunHandle>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a field for a new run.
    ///
    /// Returns the run's cancellation token, or `AlreadyActive` carrying the
    /// holder's schedule id.
    pub fn claim(&self, field_id: &str, schedule_id: Uuid) -> Result<CancellationToken, ControlError> {
        match self.runs.entry(field_id.to_string()) {
            Entry::Occupied(existing) => Err(ControlError::AlreadyActive {
                field_id: field_id.to_string(),
                schedule_id: existing.get().schedule_id,
            }),
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(RunHandle {
                    schedule_id,
                    cancel: cancel.clone(),
                });
                Ok(cancel)
            }
        }
    }

    /// Release a field's claim, but only for the run that holds it.
    ///
    /// Returns true when this call removed the entry; teardown runs exactly
    /// once because exactly one caller sees true.
    pub fn release(&self, field_id: &str, schedule_id: Uuid) -> bool {
        self.runs
            .remove_if(field_id, |_, handle| handle.schedule_id == schedule_id)
            .is_some()
    }

    /// Handle for a field's active run, if any
    pub fn get(&self, field_id: &str) -> Option<RunHandle> {
        self.runs.get(field_id).map(|entry| entry.value().clone())
    }

    /// Fields with an active run (for shutdown iteration and health)
    pub fn active_fields(&self) -> Vec<String> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
