use std::sync::Arc;

use crate::cache::CacheGuard;
use crate::events::EventHub;
use crate::ingest::IngestService;
use crate::store::Store;
use crate::Config;

/// Shared handles given to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: CacheGuard,
    pub ingest: Arc<IngestService>,
    pub hub: Arc<EventHub>,
    pub config: Arc<Config>,
}
