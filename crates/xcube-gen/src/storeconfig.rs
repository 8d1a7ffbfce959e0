//! Named data store instances.
//!
//! A store config file maps instance names to a store id and its parameters:
//!
//! ```yaml
//! cubes:
//!   store_id: s3
//!   title: Cube bucket
//!   store_params:
//!     bucket_name: ${XCUBE_CUBE_BUCKET}
//! ```
//!
//! Requests refer to an instance as `@cubes` wherever a store id is expected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use xcube_core::store::{DataParams, DataStore, DataStoreRegistry};
use xcube_core::{XcubeError, XcubeResult};

use crate::config::expand_env_vars;

const INSTANCE_PREFIX: char = '@';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub store_id: String,
    #[serde(default)]
    pub store_params: DataParams,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Store configs keyed by instance name.
pub type StoreConfigs = BTreeMap<String, StoreConfig>;

/// Load store configs from a YAML or JSON file.
pub fn load_store_configs(path: impl AsRef<Path>) -> XcubeResult<StoreConfigs> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        XcubeError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let expanded = expand_env_vars(&content)?;
    // JSON is a subset of YAML
    serde_yaml::from_str(&expanded).map_err(|e| {
        XcubeError::ConfigError(format!("Invalid store configs in {}: {}", path.display(), e))
    })
}

/// Data store registry plus the named instances created from store configs.
pub struct StorePool {
    registry: DataStoreRegistry,
    instances: BTreeMap<String, Arc<dyn DataStore>>,
}

impl StorePool {
    pub fn new(registry: DataStoreRegistry) -> Self {
        Self {
            registry,
            instances: BTreeMap::new(),
        }
    }

    /// Create one instance per config. Fails on the first invalid config.
    pub fn from_configs(registry: DataStoreRegistry, configs: &StoreConfigs) -> XcubeResult<Self> {
        let mut pool = Self::new(registry);
        for (name, config) in configs {
            let store = pool
                .registry
                .new_data_store(&config.store_id, &config.store_params)?;
            info!(instance = %name, store_id = %config.store_id, "Created data store instance");
            pool.insert(name.clone(), store);
        }
        Ok(pool)
    }

    pub fn registry(&self) -> &DataStoreRegistry {
        &self.registry
    }

    pub fn insert(&mut self, name: impl Into<String>, store: Arc<dyn DataStore>) {
        self.instances.insert(name.into(), store);
    }

    pub fn instance_names(&self) -> Vec<&str> {
        self.instances.keys().map(String::as_str).collect()
    }

    /// Resolve `store_id`: `@name` returns the named instance (ignoring
    /// `store_params`), anything else creates a new store.
    pub fn get_data_store(
        &self,
        store_id: &str,
        store_params: &DataParams,
    ) -> XcubeResult<Arc<dyn DataStore>> {
        match store_id.strip_prefix(INSTANCE_PREFIX) {
            Some(name) => self.instances.get(name).cloned().ok_or_else(|| {
                XcubeError::ConfigError(format!("unknown data store instance \"{}\"", name))
            }),
            None => self.registry.new_data_store(store_id, store_params),
        }
    }

    /// Create a store able to handle the accessor `accessor_id`, e.g.
    /// `"dataset:zarr:file"`.
    pub fn get_data_store_for_accessor(
        &self,
        accessor_id: &str,
        store_params: &DataParams,
    ) -> XcubeResult<Arc<dyn DataStore>> {
        let store_id = self
            .registry
            .find_store_ids(accessor_id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                XcubeError::invalid_argument(format!(
                    "no data store provides accessor \"{}\"",
                    accessor_id
                ))
            })?;
        self.registry.new_data_store(store_id, store_params)
    }
}

impl Default for StorePool {
    fn default() -> Self {
        Self::new(DataStoreRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_instance_is_shared() {
        let mut configs = StoreConfigs::new();
        configs.insert(
            "scratch".to_string(),
            StoreConfig {
                store_id: "memory".to_string(),
                store_params: DataParams::new(),
                title: Some("Scratch".to_string()),
                description: None,
            },
        );
        let pool = StorePool::from_configs(DataStoreRegistry::with_defaults(), &configs).unwrap();
        assert_eq!(pool.instance_names(), vec!["scratch"]);

        let a = pool.get_data_store("@scratch", &DataParams::new()).unwrap();
        let b = pool.get_data_store("@scratch", &DataParams::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.store_id(), "memory");
    }

    #[test]
    fn test_unknown_instance_and_store() {
        let pool = StorePool::default();
        let err = pool
            .get_data_store("@missing", &DataParams::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("\"missing\""));

        let err = pool.get_data_store("ftp", &DataParams::new()).err().unwrap();
        assert!(matches!(err, XcubeError::UnknownDataStore(_)));
    }

    #[test]
    fn test_store_for_accessor() {
        let pool = StorePool::default();
        let store = pool
            .get_data_store_for_accessor("dataset:zarr:memory", &DataParams::new())
            .unwrap();
        assert_eq!(store.store_id(), "memory");
        assert!(pool
            .get_data_store_for_accessor("dataset:netcdf:file", &DataParams::new())
            .is_err());
    }

    #[test]
    fn test_invalid_config_fails() {
        let mut configs = StoreConfigs::new();
        configs.insert(
            "bucket".to_string(),
            StoreConfig {
                store_id: "s3".to_string(),
                store_params: DataParams::new(),
                title: None,
                description: None,
            },
        );
        let result = StorePool::from_configs(DataStoreRegistry::with_defaults(), &configs);
        assert!(matches!(result, Err(XcubeError::InvalidParams { .. })));
    }
}
