//! Has this reading already been processed?

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheGuard;
use crate::models::Reading;
use crate::store::{self, Store};

/// Cache key marking a processed reading.
pub fn dedup_key(reading: &Reading) -> String {
    format!(
        "reading:{}:{}",
        reading.sensor_id,
        reading.timestamp.timestamp_millis()
    )
}

/// Two-tier duplicate check: the cache first, then the durable store.
///
/// Neither tier can block ingestion. A cache failure falls through to the
/// store; a store failure or timeout counts as "not a duplicate".
pub struct DuplicateFilter {
    store: Arc<dyn Store>,
    cache: CacheGuard,
    window: Duration,
    radius: Duration,
    timeout: Duration,
}

impl DuplicateFilter {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheGuard,
        window: Duration,
        radius: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            window,
            radius,
            timeout,
        }
    }

    pub async fn is_duplicate(&self, reading: &Reading) -> bool {
        // ---
        let key = dedup_key(reading);
        if self.cache.lookup(&key).await.is_some() {
            return true;
        }

        let received_since =
            store::before(Utc::now(), self.window).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let check = self.store.reading_exists_near(
            &reading.sensor_id,
            reading.timestamp,
            self.radius,
            received_since,
        );
        match store::bounded(self.timeout, check).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    sensor_id = %reading.sensor_id,
                    error = %format!("{e:#}"),
                    "duplicate check unavailable; accepting reading"
                );
                false
            }
        }
    }
}
