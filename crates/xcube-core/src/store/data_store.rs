//! The [`DataStore`] trait implemented by every storage backend.

use super::dataset::Dataset;
use super::schema::{DataParams, ParamsSchema};
use crate::error::XcubeResult;

/// A backend able to catalog, open, write and delete datasets.
///
/// All calls block the calling thread until the backend has completed the
/// operation. Implementations must be safe to share between threads.
pub trait DataStore: Send + Sync {
    /// Identifier under which the store is registered, e.g. `"file"`.
    fn store_id(&self) -> &str;

    /// Schema of the parameters used to construct this store.
    fn get_data_store_params_schema(&self) -> ParamsSchema;

    /// Schema of the `open_params` accepted by `open_data`.
    fn get_open_data_params_schema(&self, opener_id: Option<&str>) -> XcubeResult<ParamsSchema>;

    /// Schema of the `write_params` accepted by `write_data`.
    fn get_write_data_params_schema(&self, writer_id: Option<&str>)
        -> XcubeResult<ParamsSchema>;

    fn get_type_ids(&self) -> Vec<String>;

    fn get_data_opener_ids(&self) -> Vec<String>;

    fn get_data_writer_ids(&self) -> Vec<String>;

    /// Identifiers of the stored data resources, each with an optional title.
    fn get_data_ids(&self, type_id: Option<&str>) -> XcubeResult<Vec<(String, Option<String>)>>;

    fn has_data(&self, data_id: &str) -> XcubeResult<bool>;

    /// Read the data resource `data_id`.
    ///
    /// Fails with `DataNotFound` if it does not exist and with
    /// `InvalidParams` if `open_params` violate the open schema.
    fn open_data(
        &self,
        data_id: &str,
        opener_id: Option<&str>,
        open_params: &DataParams,
    ) -> XcubeResult<Dataset>;

    /// Persist `dataset` and return its data identifier.
    ///
    /// A fresh identifier is generated if `data_id` is `None`. Without
    /// `replace`, writing to an existing resource fails with `Conflict`.
    fn write_data(
        &self,
        dataset: &Dataset,
        data_id: Option<&str>,
        writer_id: Option<&str>,
        replace: bool,
        write_params: &DataParams,
    ) -> XcubeResult<String>;

    /// Remove `data_id`; fails with `DataNotFound` if it does not exist.
    fn delete_data(&self, data_id: &str) -> XcubeResult<()>;
}
