//! Shared application state for Axum handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
