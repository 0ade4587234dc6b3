use std::sync::Arc;

use pulse_core::{MonitorConfig, StreamStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StreamStore>,
    pub config: MonitorConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self {
            store,
            config: MonitorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }
}
