//! Data stores: schema-validated access to datasets in files, memory or S3.
//!
//! Every backend implements [`DataStore`] and persists datasets as Zarr V3
//! groups. Stores are created by id through a [`DataStoreRegistry`].

mod accessor;
mod data_store;
mod dataset;
pub mod file;
pub mod memory;
mod registry;
pub mod s3;
mod schema;
mod zarr;

pub use accessor::{DataAccessorId, FORMAT_ID_ZARR, TYPE_ID_DATASET};
pub use data_store::DataStore;
pub use dataset::{Attributes, Dataset, Variable};
pub use registry::{DataStoreExtension, DataStoreRegistry};
pub use schema::{DataParams, DataParamsExt, ParamType, ParamsSchema, PropertySchema};
pub use zarr::{open_data_params_schema, write_data_params_schema, ZarrDataStore};
