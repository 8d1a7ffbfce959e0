//! Lookup table of data store implementations keyed by store id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::accessor::DataAccessorId;
use super::data_store::DataStore;
use super::schema::{DataParams, ParamsSchema};
use super::{file, memory, s3};
use crate::error::{XcubeError, XcubeResult};

type DataStoreFactory = Box<dyn Fn(&DataParams) -> XcubeResult<Arc<dyn DataStore>> + Send + Sync>;

/// A registered data store implementation.
pub struct DataStoreExtension {
    store_id: String,
    description: String,
    params_schema: fn() -> ParamsSchema,
    accessor_ids: Vec<DataAccessorId>,
    factory: DataStoreFactory,
}

impl DataStoreExtension {
    /// Register `factory` under `store_id`. The extension announces the
    /// `dataset:zarr:<store_id>` accessor unless others are set.
    pub fn new<F>(
        store_id: impl Into<String>,
        description: impl Into<String>,
        params_schema: fn() -> ParamsSchema,
        factory: F,
    ) -> Self
    where
        F: Fn(&DataParams) -> XcubeResult<Arc<dyn DataStore>> + Send + Sync + 'static,
    {
        let store_id = store_id.into();
        Self {
            accessor_ids: vec![DataAccessorId::zarr_dataset(store_id.as_str())],
            store_id,
            description: description.into(),
            params_schema,
            factory: Box::new(factory),
        }
    }

    pub fn with_accessor_ids(mut self, accessor_ids: Vec<DataAccessorId>) -> Self {
        self.accessor_ids = accessor_ids;
        self
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params_schema(&self) -> ParamsSchema {
        (self.params_schema)()
    }

    pub fn accessor_ids(&self) -> &[DataAccessorId] {
        &self.accessor_ids
    }
}

impl fmt::Debug for DataStoreExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStoreExtension")
            .field("store_id", &self.store_id)
            .field("description", &self.description)
            .field("accessor_ids", &self.accessor_ids)
            .finish()
    }
}

/// Registry resolving store ids to constructors.
#[derive(Debug, Default)]
pub struct DataStoreRegistry {
    extensions: BTreeMap<String, DataStoreExtension>,
}

impl DataStoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `file`, `memory` and `s3` stores.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DataStoreExtension::new(
            file::STORE_ID,
            "Data store for a local directory",
            file::data_store_params_schema,
            |params| Ok(Arc::new(file::new_data_store(params)?) as Arc<dyn DataStore>),
        ));
        registry.register(DataStoreExtension::new(
            memory::STORE_ID,
            "Data store in process memory",
            memory::data_store_params_schema,
            |params| Ok(Arc::new(memory::new_data_store(params)?) as Arc<dyn DataStore>),
        ));
        registry.register(DataStoreExtension::new(
            s3::STORE_ID,
            "Data store for an S3-compatible object storage bucket",
            s3::data_store_params_schema,
            |params| Ok(Arc::new(s3::new_data_store(params)?) as Arc<dyn DataStore>),
        ));
        registry
    }

    /// Add an extension, replacing any with the same store id.
    pub fn register(&mut self, extension: DataStoreExtension) {
        debug!(store_id = %extension.store_id, "Registered data store");
        self.extensions
            .insert(extension.store_id.clone(), extension);
    }

    pub fn store_ids(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }

    pub fn extension(&self, store_id: &str) -> XcubeResult<&DataStoreExtension> {
        self.extensions
            .get(store_id)
            .ok_or_else(|| XcubeError::UnknownDataStore(store_id.to_string()))
    }

    pub fn get_data_store_params_schema(&self, store_id: &str) -> XcubeResult<ParamsSchema> {
        Ok(self.extension(store_id)?.params_schema())
    }

    /// Validate `params`, apply defaults and construct the store.
    pub fn new_data_store(
        &self,
        store_id: &str,
        params: &DataParams,
    ) -> XcubeResult<Arc<dyn DataStore>> {
        let extension = self.extension(store_id)?;
        let params = extension.params_schema().apply_defaults(params)?;
        debug!(store_id, "Creating data store");
        (extension.factory)(&params)
    }

    /// Ids of the stores offering an accessor matching `pattern`, e.g.
    /// `"dataset:zarr:s3"` or `"dataset:zarr"`.
    pub fn find_store_ids(&self, pattern: &str) -> Vec<&str> {
        self.extensions
            .values()
            .filter(|extension| extension.accessor_ids.iter().any(|id| id.matches(pattern)))
            .map(|extension| extension.store_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let registry = DataStoreRegistry::with_defaults();
        assert_eq!(registry.store_ids(), vec!["file", "memory", "s3"]);
        assert_eq!(
            registry.extension("s3").unwrap().accessor_ids()[0].to_string(),
            "dataset:zarr:s3"
        );
    }

    #[test]
    fn test_unknown_store() {
        let registry = DataStoreRegistry::with_defaults();
        let err = registry.new_data_store("ftp", &DataParams::new()).err().unwrap();
        assert_eq!(err.to_string(), "unknown data store \"ftp\"");
        assert!(registry.get_data_store_params_schema("ftp").is_err());
    }

    #[test]
    fn test_params_validated_before_construction() {
        let registry = DataStoreRegistry::with_defaults();
        let mut params = DataParams::new();
        params.insert("root".to_string(), json!("/tmp"));
        let err = registry.new_data_store("memory", &params).err().unwrap();
        assert!(matches!(err, XcubeError::InvalidParams { .. }));
    }

    #[test]
    fn test_find_store_ids() {
        let registry = DataStoreRegistry::with_defaults();
        assert_eq!(registry.find_store_ids("dataset:zarr:s3"), vec!["s3"]);
        assert_eq!(registry.find_store_ids("dataset:zarr").len(), 3);
        assert!(registry.find_store_ids("dataset:netcdf").is_empty());
    }

    #[test]
    fn test_register_custom() {
        let mut registry = DataStoreRegistry::new();
        registry.register(
            DataStoreExtension::new(
                "scratch",
                "Scratch space",
                memory::data_store_params_schema,
                |params| Ok(Arc::new(memory::new_data_store(params)?) as Arc<dyn DataStore>),
            )
            .with_accessor_ids(vec![DataAccessorId::zarr_dataset("memory")]),
        );
        let store = registry.new_data_store("scratch", &DataParams::new()).unwrap();
        assert_eq!(store.store_id(), "memory");
        assert_eq!(registry.find_store_ids("::memory"), vec!["scratch"]);
    }
}
