use std::sync::Arc;

use crate::cache::CacheClient;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when the configured Redis URL could not be parsed; the service
    /// runs without a cache in that case.
    pub cache: Option<CacheClient>,
}
