use std::sync::Arc;
use std::time::Duration;

use super::dedup::dedup_key;
use crate::cache::CacheGuard;
use crate::error::IngestError;
use crate::models::{Reading, StoredReading};
use crate::store::{self, Store};

/// Durable write of a reading plus its bookkeeping side effects.
pub struct ReadingRecorder {
    store: Arc<dyn Store>,
    cache: CacheGuard,
    window: Duration,
    timeout: Duration,
}

impl ReadingRecorder {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheGuard,
        window: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            window,
            timeout,
        }
    }

    /// Persist `reading`, then mark it processed and update its gateway.
    ///
    /// Only the insert can fail the call. The dedup marker is written after
    /// the insert succeeds; gateway bookkeeping failures are logged.
    pub async fn record(&self, reading: &Reading) -> Result<StoredReading, IngestError> {
        // ---
        let persisted = store::bounded(self.timeout, self.store.insert_reading(reading))
            .await
            .map_err(|e| {
                tracing::error!(
                    sensor_id = %reading.sensor_id,
                    error = %format!("{e:#}"),
                    "failed to persist reading"
                );
                IngestError::Storage(e)
            })?;

        self.cache
            .remember(&dedup_key(reading), &persisted.id.to_string(), self.window)
            .await;

        if let Some(gateway_id) = &reading.gateway_id {
            let touch = self.store.touch_gateway(gateway_id, persisted.received_at);
            if let Err(e) = store::bounded(self.timeout, touch).await {
                tracing::warn!(
                    gateway_id = %gateway_id,
                    error = %format!("{e:#}"),
                    "gateway bookkeeping failed; reading kept"
                );
            }
        }

        Ok(StoredReading {
            id: persisted.id,
            received_at: persisted.received_at,
            reading: reading.clone(),
        })
    }
}
