use crate::store::{ConfigStore, StoreError};

const DEFAULT_CONFIG: &str = include_str!("../data/default_config.json");

/// Snapshot used when no server-provided configuration is available.
pub fn default_store() -> Result<ConfigStore, StoreError> {
    ConfigStore::from_json_str(DEFAULT_CONFIG)
}
