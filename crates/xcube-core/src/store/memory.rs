//! Data store keeping everything in process memory.

use std::sync::Arc;

use zarrs_storage::store::MemoryStore;

use super::schema::{DataParams, ParamsSchema};
use super::zarr::ZarrDataStore;
use crate::error::XcubeResult;

pub const STORE_ID: &str = "memory";

pub fn data_store_params_schema() -> ParamsSchema {
    ParamsSchema::new("memory data store parameters")
}

/// Create an empty store. Its content lives as long as the store.
pub fn new_data_store(params: &DataParams) -> XcubeResult<ZarrDataStore> {
    data_store_params_schema().validate(params)?;
    Ok(ZarrDataStore::new(
        STORE_ID,
        Arc::new(MemoryStore::new()),
        data_store_params_schema(),
    ))
}
