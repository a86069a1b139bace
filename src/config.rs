use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Nora";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    format!("info,{}=debug", env!("CARGO_PKG_NAME").replace('-', "_"))
}

/// Get the application data directory
/// ~/Nora/ on all platforms (user-visible by design)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Nora")
}

/// Path of the local conversation mirror (JSON file).
pub fn local_store_path() -> PathBuf {
    app_data_dir().join("conversations.json")
}

/// Path of the remote-store stand-in database.
pub fn remote_db_path() -> PathBuf {
    app_data_dir().join("nora.db")
}

/// Default local-store capacity (conversations kept before eviction).
pub const LOCAL_STORE_CAPACITY: usize = 100;

/// Conversations older than this are pruned by background maintenance.
pub const PRUNE_AFTER_DAYS: i64 = 90;
