//! Composite opener/writer identifiers of the form `<type>:<format>:<storage>`.

use std::fmt;
use std::str::FromStr;

use crate::error::XcubeError;

/// The only data type handled by the stores in this crate.
pub const TYPE_ID_DATASET: &str = "dataset";

/// Persistence format used by all stores.
pub const FORMAT_ID_ZARR: &str = "zarr";

/// Identifies a (data type, format, storage backend) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataAccessorId {
    pub type_id: String,
    pub format_id: String,
    pub storage_id: String,
}

impl DataAccessorId {
    pub fn new(
        type_id: impl Into<String>,
        format_id: impl Into<String>,
        storage_id: impl Into<String>,
    ) -> Self {
        Self {
            type_id: type_id.into(),
            format_id: format_id.into(),
            storage_id: storage_id.into(),
        }
    }

    /// The `dataset:zarr:<storage_id>` accessor.
    pub fn zarr_dataset(storage_id: impl Into<String>) -> Self {
        Self::new(TYPE_ID_DATASET, FORMAT_ID_ZARR, storage_id)
    }

    /// Match against a pattern where empty or `*` components match anything.
    pub fn matches(&self, pattern: &str) -> bool {
        let mut parts = pattern.split(':');
        let components = [&self.type_id, &self.format_id, &self.storage_id];
        components.iter().all(|component| match parts.next() {
            None | Some("") | Some("*") => true,
            Some(part) => part == component.as_str(),
        }) && parts.next().is_none()
    }
}

impl fmt::Display for DataAccessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.type_id, self.format_id, self.storage_id)
    }
}

impl FromStr for DataAccessorId {
    type Err = XcubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [type_id, format_id, storage_id]
                if !type_id.is_empty() && !format_id.is_empty() && !storage_id.is_empty() =>
            {
                Ok(Self::new(*type_id, *format_id, *storage_id))
            }
            _ => Err(XcubeError::invalid_argument(format!(
                "invalid data accessor identifier \"{}\", expected <type>:<format>:<storage>",
                s
            ))),
        }
    }
}
