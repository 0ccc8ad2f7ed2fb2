//! Background uploader draining the event queue to the broker bridge
//!
//! Posts each pending event to `POST {broker}/topics/{topic}` and removes it
//! from the queue only on acceptance. Failures leave the event queued for the
//! next cycle; the control loop never notices either way.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DomainEvent, EventQueue};
use crate::config::defaults::{EVENT_UPLOADER_INTERVAL_SECS, HTTP_TIMEOUT_SECS};
use crate::config::EndpointConfig;

/// Drains the durable event queue to the message broker's HTTP bridge
pub struct EventUploader {
    queue: Arc<EventQueue>,
    http: reqwest::Client,
    broker_url: String,
    api_key: Option<String>,
}

impl EventUploader {
    pub fn new(queue: Arc<EventQueue>, broker: &EndpointConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            queue,
            http,
            broker_url: broker.base_url.trim_end_matches('/').to_string(),
            api_key: broker.api_key.clone(),
        }
    }

    /// Run the drain loop until cancellation (call from `tokio::spawn`)
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            broker = %self.broker_url,
            interval_secs = EVENT_UPLOADER_INTERVAL_SECS,
            "Event uploader started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(EVENT_UPLOADER_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Event uploader shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.drain_once().await;
                }
            }
        }
    }

    async fn drain_once(&self) {
        let events = match self.queue.drain() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Could not read event queue");
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        debug!(pending = events.len(), "Draining event queue to broker");
        for event in events {
            match self.post(&event).await {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_published(&event.id) {
                        warn!(id = %event.id, error = %e, "Could not remove published event");
                    }
                }
                Err(e) => {
                    // Leave it queued; the next cycle retries in order
                    warn!(id = %event.id, topic = %event.topic, error = %e, "Broker publish failed");
                    break;
                }
            }
        }
    }

    async fn post(&self, event: &DomainEvent) -> Result<(), reqwest::Error> {
        let mut request = self
            .http
            .post(format!("{}/topics/{}", self.broker_url, event.topic))
            .json(event);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}
