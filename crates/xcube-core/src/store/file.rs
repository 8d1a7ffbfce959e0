//! Data store over a local directory.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;
use zarrs_filesystem::FilesystemStore;

use super::schema::{DataParams, DataParamsExt, ParamsSchema, PropertySchema};
use super::zarr::ZarrDataStore;
use crate::error::{XcubeError, XcubeResult};

pub const STORE_ID: &str = "file";

pub fn data_store_params_schema() -> ParamsSchema {
    ParamsSchema::new("file data store parameters")
        .property(
            "root",
            PropertySchema::string()
                .default_value(json!("."))
                .description("Root directory of the store"),
        )
        .property(
            "read_only",
            PropertySchema::boolean()
                .default_value(json!(false))
                .description("Reject writes and deletes"),
        )
}

/// Create a store rooted at `params.root`.
///
/// A writable store creates its root directory if it does not exist yet.
pub fn new_data_store(params: &DataParams) -> XcubeResult<ZarrDataStore> {
    let params = data_store_params_schema().apply_defaults(params)?;
    let root = params.get_str("root").unwrap_or(".");
    let read_only = params.get_bool("read_only").unwrap_or(false);

    if !read_only {
        std::fs::create_dir_all(root)?;
    }
    let storage = FilesystemStore::new(root).map_err(|e| {
        XcubeError::storage(format!("Failed to open directory \"{}\": {}", root, e))
    })?;
    debug!(root, read_only, "Opened file data store");

    Ok(
        ZarrDataStore::new(STORE_ID, Arc::new(storage), data_store_params_schema())
            .with_read_only(read_only),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DataStore;

    #[test]
    fn test_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("cubes");
        let mut params = DataParams::new();
        params.insert("root".to_string(), json!(root.to_str().unwrap()));

        let store = new_data_store(&params).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.store_id(), "file");
        assert!(store.get_data_ids(None).unwrap().is_empty());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = DataParams::new();
        params.insert("root".to_string(), json!(dir.path().to_str().unwrap()));
        params.insert("read_only".to_string(), json!(true));

        let store = new_data_store(&params).unwrap();
        assert!(store.is_read_only());
        let err = store
            .write_data(&Default::default(), Some("a.zarr"), None, false, &DataParams::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "data store \"file\" is read-only");
    }
}
