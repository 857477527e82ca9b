pub mod chat;
pub mod config_cmd;
pub mod doctor;
pub mod serve;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use forgepilot_config::AppConfig;
use forgepilot_core::store::ConversationStore;
use forgepilot_store::{FileStore, InMemoryStore};

/// The config file to use: `--config` if given, else the default location.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path)
}

/// Load and validate the configuration, with environment overrides.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = config_file(explicit);
    AppConfig::load_with_env(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// The conversation store: memory only when `ephemeral`, else the JSON file
/// at `path`.
pub fn open_store(ephemeral: bool, path: PathBuf) -> Arc<dyn ConversationStore> {
    if ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(FileStore::open(path))
    }
}
