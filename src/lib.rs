//! Client core for the Nora assistant: conversation model, local mirror,
//! remote store with live subscription, sync coordinator, plan-limit gate
//! and the HTTP edge.

pub mod api;
pub mod assistant;
pub mod billing;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod limits;
pub mod local_store;
pub mod models;
pub mod prefs_cache;
pub mod remote_store;

use tracing_subscriber::EnvFilter;

/// Initialize tracing. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
}
