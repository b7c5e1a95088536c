use std::sync::Arc;
use mediarelay_core::{Config, Engine};

/// Shared application state
pub struct AppState {
    config: Config,
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self { config, engine }
    }

    pub fn engine(&self) -> &Engine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
