//! Shared application state for all routes.

use crate::cache::KeyValueCache;
use crate::model::ModelRegistry;
use crate::settings::Settings;
use crate::store::Store;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Resolved once at startup; read-only afterwards.
    pub models: Arc<ModelRegistry>,
    /// Reloadable without restart.
    pub settings: Arc<RwLock<Settings>>,
    pub cache: Option<KeyValueCache>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, models: ModelRegistry, settings: Settings) -> Self {
        AppState {
            store,
            models: Arc::new(models),
            settings: Arc::new(RwLock::new(settings)),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: KeyValueCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// `(default, max)` page size from the `[app]` section.
    pub fn page_size(&self) -> (u64, u64) {
        match self.settings.read() {
            Ok(s) => (s.app.page_size, s.app.max_page_size),
            Err(_) => (
                crate::engine::context::DEFAULT_PAGE_SIZE,
                crate::engine::context::DEFAULT_MAX_PAGE_SIZE,
            ),
        }
    }
}
