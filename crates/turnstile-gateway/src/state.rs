use std::sync::Arc;

use turnstile_config::AppConfig;
use turnstile_db::AttendanceStore;

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<AttendanceStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<AttendanceStore>) -> Self {
        Self { config, store }
    }
}

pub type SharedState = Arc<AppState>;
