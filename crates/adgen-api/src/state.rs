//! Application state.

use adgen_engine::Orchestrator;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub engine: Orchestrator,
}

impl AppState {
    pub fn new(config: ApiConfig, engine: Orchestrator) -> Self {
        Self { config, engine }
    }
}
