use std::path::PathBuf;

use crate::APP_NAME;

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// File backing the persistent key-value store inside a data directory.
pub fn store_file(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("store.json")
}
