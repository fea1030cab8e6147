//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use furrow_core::config::FurrowConfig;
use furrow_vector::RetrievalEngine;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. The
/// configuration is read-only once the server starts.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FurrowConfig>,
    pub engine: Arc<RetrievalEngine>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: FurrowConfig, engine: RetrievalEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            start_time: Instant::now(),
        }
    }

    /// Clamp a requested result count to `[1, max_k]`, defaulting to `default_k`.
    pub fn clamp_k(&self, requested: Option<usize>) -> usize {
        let search = &self.config.search;
        let max_k = search.max_k.max(1);
        requested.unwrap_or(search.default_k).clamp(1, max_k)
    }
}
