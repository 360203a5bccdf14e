//! Synchronous ingestion path.
//!
//! ```text
//! payload -> normalize -> rate limit -> duplicate filter -> recorder -> publish + enqueue
//! ```
//!
//! The caller gets a definitive outcome: accepted, duplicate, or an
//! [`IngestError`]. Alert evaluation is only queued here and runs on the
//! alert worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::alerts::AlertQueue;
use crate::cache::CacheGuard;
use crate::error::IngestError;
use crate::events::EventHub;
use crate::models::StoredReading;
use crate::normalize::normalize;
use crate::store::Store;

mod dedup;
mod limiter;
mod recorder;

pub use dedup::{dedup_key, DuplicateFilter};
pub use limiter::SensorRateLimiter;
pub use recorder::ReadingRecorder;

// ---

/// Tunables of the ingest path, taken from [`crate::Config`].
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub duplicate_window: Duration,
    pub match_radius: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub dependency_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(StoredReading),
    /// Already processed within the duplicate window; nothing was written.
    Duplicate,
}

pub struct IngestService {
    filter: DuplicateFilter,
    recorder: ReadingRecorder,
    limiter: Arc<SensorRateLimiter>,
    hub: Arc<EventHub>,
    queue: AlertQueue,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheGuard,
        hub: Arc<EventHub>,
        queue: AlertQueue,
        settings: IngestSettings,
    ) -> Self {
        // ---
        let filter = DuplicateFilter::new(
            Arc::clone(&store),
            cache.clone(),
            settings.duplicate_window,
            settings.match_radius,
            settings.dependency_timeout,
        );
        let recorder = ReadingRecorder::new(
            store,
            cache,
            settings.duplicate_window,
            settings.dependency_timeout,
        );
        let limiter = SensorRateLimiter::new(settings.rate_limit_window, settings.rate_limit_max);
        Self {
            filter,
            recorder,
            limiter: Arc::new(limiter),
            hub,
            queue,
        }
    }

    /// Shared with the sweeper, which prunes idle sensors.
    pub fn rate_limiter(&self) -> Arc<SensorRateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub async fn ingest(&self, payload: &Value) -> Result<IngestOutcome, IngestError> {
        // ---
        let reading = normalize(payload)?;
        self.check_rate(&reading.sensor_id)?;

        if self.filter.is_duplicate(&reading).await {
            tracing::info!(sensor_id = %reading.sensor_id, "duplicate reading skipped");
            return Ok(IngestOutcome::Duplicate);
        }

        let stored = self.recorder.record(&reading).await?;
        tracing::info!(
            sensor_id = %stored.reading.sensor_id,
            reading_id = %stored.id,
            format = stored.reading.format.as_str(),
            "reading accepted"
        );

        self.hub.publish_reading(&stored);
        self.queue.enqueue(stored.reading.clone());
        Ok(IngestOutcome::Accepted(stored))
    }

    fn check_rate(&self, sensor_id: &str) -> Result<(), IngestError> {
        // ---
        self.limiter.check(sensor_id).map_err(|retry_after| {
            tracing::warn!(sensor_id, retry_after, "rate limit exceeded");
            IngestError::RateLimited {
                sensor_id: sensor_id.to_string(),
                retry_after,
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    // ---
    use super::*;

    pub fn settings() -> IngestSettings {
        IngestSettings {
            duplicate_window: Duration::from_secs(300),
            match_radius: Duration::from_millis(1000),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 20,
            dependency_timeout: Duration::from_secs(3),
        }
    }
}
