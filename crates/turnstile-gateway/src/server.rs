use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use turnstile_common::Result;
use turnstile_config::AppConfig;
use turnstile_db::{AttendanceStore, MigrationRunner};

use crate::router::build_router;
use crate::state::AppState;

/// The main gateway server: opens the store, brings the schema up to
/// date, then serves the API.
pub struct GatewayServer {
    config: AppConfig,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);

        let store = Arc::new(self.open_store()?);

        // Startup upgrade check. A migration failure here is fatal:
        // serving traffic against a half-upgraded schema is worse than
        // not starting.
        let applied = MigrationRunner::new(&store).apply_all_pending()?;
        if applied > 0 {
            info!("applied {applied} schema migrations on startup");
        }

        let state = Arc::new(AppState::new(self.config, store));
        let app = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("turnstile gateway listening on {addr}");

        axum::serve(listener, app)
            .await
            .map_err(|e| turnstile_common::Error::Gateway(format!("server error: {e}")))?;

        Ok(())
    }

    fn open_store(&self) -> Result<AttendanceStore> {
        let data_dir = self
            .config
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"));
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("turnstile.db");
        AttendanceStore::open(&db_path)
    }
}
