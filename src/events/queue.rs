//! Disk-backed durable event queue
//!
//! Events are written as JSON files named by event id, so enqueueing is
//! idempotent under retry and pending events survive a restart. The uploader
//! drains the directory oldest-first and removes entries only after the
//! broker accepts them.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::DomainEvent;

/// Bound on pending events before the oldest entry is dropped
const DEFAULT_MAX_QUEUE_SIZE: usize = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable queue of domain events awaiting broker publication
pub struct EventQueue {
    queue_dir: PathBuf,
    max_size: usize,
}

impl EventQueue {
    /// Create or open a queue at the given directory
    pub fn open<P: AsRef<Path>>(queue_dir: P) -> Result<Self, QueueError> {
        let queue_dir = queue_dir.as_ref().to_path_buf();
        fs::create_dir_all(&queue_dir).map_err(|e| QueueError::Io(e.to_string()))?;

        let queue = Self {
            queue_dir,
            max_size: DEFAULT_MAX_QUEUE_SIZE,
        };

        let pending = queue.pending_count()?;
        if pending > 0 {
            info!(pending, "Event queue opened with pending events");
        } else {
            debug!("Event queue opened (empty)");
        }

        Ok(queue)
    }

    /// Enqueue an event. Duplicate ids are silently skipped.
    pub fn enqueue(&self, event: &DomainEvent) -> Result<(), QueueError> {
        if self.pending_count()? >= self.max_size {
            warn!(max = self.max_size, "Event queue full, dropping oldest");
            self.drop_oldest()?;
        }

        let path = self.event_path(&event.id);
        if path.exists() {
            debug!(id = %event.id, "Event already queued, skipping");
            return Ok(());
        }

        let json =
            serde_json::to_vec(event).map_err(|e| QueueError::Serialization(e.to_string()))?;
        fs::write(&path, &json).map_err(|e| QueueError::Io(e.to_string()))?;

        debug!(id = %event.id, topic = %event.topic, "Event queued");
        Ok(())
    }

    /// All pending events, oldest first. Entries stay on disk until
    /// [`mark_published`](Self::mark_published).
    pub fn drain(&self) -> Result<Vec<DomainEvent>, QueueError> {
        let mut events = Vec::new();

        let entries =
            fs::read_dir(&self.queue_dir).map_err(|e| QueueError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| QueueError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path) {
                Ok(data) => match serde_json::from_slice::<DomainEvent>(&data) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Corrupted queue entry, removing");
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read queue entry");
                }
            }
        }

        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Remove an event after the broker accepted it
    pub fn mark_published(&self, event_id: &str) -> Result<(), QueueError> {
        let path = self.event_path(event_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| QueueError::Io(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        let entries =
            fs::read_dir(&self.queue_dir).map_err(|e| QueueError::Io(e.to_string()))?;
        Ok(entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("json"))
            .count())
    }

    fn drop_oldest(&self) -> Result<(), QueueError> {
        let entries =
            fs::read_dir(&self.queue_dir).map_err(|e| QueueError::Io(e.to_string()))?;

        let mut oldest: Option<(PathBuf, std::time::SystemTime)> = None;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                match &oldest {
                    Some((_, t)) if modified >= *t => {}
                    _ => oldest = Some((path, modified)),
                }
            }
        }

        if let Some((path, _)) = oldest {
            fs::remove_file(&path).map_err(|e| QueueError::Io(e.to_string()))?;
            debug!(path = %path.display(), "Dropped oldest queue entry");
        }
        Ok(())
    }

    fn event_path(&self, event_id: &str) -> PathBuf {
        let safe_id: String = event_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.queue_dir.join(format!("{safe_id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::topics;
    use super::*;
    use chrono::Utc;

    fn event(id_suffix: &str, ts_offset_ms: i64) -> DomainEvent {
        let timestamp = Utc::now() + chrono::Duration::milliseconds(ts_offset_ms);
        DomainEvent {
            id: format!("irrigation_started-field-1-{id_suffix}"),
            topic: topics::AWD_IRRIGATION_EVENTS.to_string(),
            kind: "irrigation_started".to_string(),
            field_id: "field-1".to_string(),
            schedule_id: None,
            payload: serde_json::json!({}),
            timestamp,
        }
    }

    #[test]
    fn enqueue_and_drain_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = EventQueue::open(tmp.path().join("events")).unwrap();

        queue.enqueue(&event("b", 100)).unwrap();
        queue.enqueue(&event("a", 0)).unwrap();

        let drained = queue.drain().unwrap();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].timestamp <= drained[1].timestamp);
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = EventQueue::open(tmp.path().join("events")).unwrap();

        queue.enqueue(&event("a", 0)).unwrap();
        queue.enqueue(&event("a", 0)).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn pending_events_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("events");
        {
            let queue = EventQueue::open(&dir).unwrap();
            queue.enqueue(&event("a", 0)).unwrap();
        }
        let queue = EventQueue::open(&dir).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);

        queue
            .mark_published(&event("a", 0).id)
            .unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
