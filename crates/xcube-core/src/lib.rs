//! Data-store abstraction and progress observation for xcube data cubes.
//!
//! - [`store`]: the [`DataStore`](store::DataStore) trait with file, memory
//!   and S3 backends, parameter schemas and the store registry.
//! - [`progress`]: nested weighted progress scopes reported to observers.

pub mod error;
pub mod progress;
pub mod store;

pub use error::{XcubeError, XcubeResult};
