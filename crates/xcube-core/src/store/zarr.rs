//! Zarr V3 dataset persistence shared by all stores.
//!
//! Each data resource is a group `/<data_id>` holding one `float64` array per
//! variable. Arrays carry their dimension names in the `_ARRAY_DIMENSIONS`
//! attribute; the group lists its coordinate variables in `coordinates`.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zarrs::array::{Array, ArrayBuilder, ChunkGrid, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorage, StoreKey,
    StorePrefix, WritableStorageTraits,
};

use super::accessor::{DataAccessorId, TYPE_ID_DATASET};
use super::data_store::DataStore;
use super::dataset::{Attributes, Dataset, Variable};
use super::schema::{DataParams, DataParamsExt, ParamType, ParamsSchema, PropertySchema};
use crate::error::{XcubeError, XcubeResult};

const ARRAY_DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";
const COORDINATES_ATTR: &str = "coordinates";
const METADATA_FILE: &str = "zarr.json";

/// Schema of the options accepted when opening a Zarr dataset.
pub fn open_data_params_schema() -> ParamsSchema {
    ParamsSchema::new("open parameters")
        .property(
            "chunks",
            PropertySchema::object()
                .nullable()
                .description("Chunk sizes along each dimension for reading"),
        )
        .property(
            "consolidated",
            PropertySchema::boolean().description("Read consolidated metadata"),
        )
        .property("decode_cf", PropertySchema::boolean().default_value(json!(true)))
        .property(
            "decode_coords",
            PropertySchema::boolean().default_value(json!(true)),
        )
        .property(
            "decode_times",
            PropertySchema::boolean().default_value(json!(true)),
        )
        .property(
            "drop_variables",
            PropertySchema::one_of(&[ParamType::String, ParamType::Array])
                .nullable()
                .description("Variables to exclude from the opened dataset"),
        )
        .property(
            "group",
            PropertySchema::string()
                .nullable()
                .description("Group path within the data resource"),
        )
        .property(
            "mask_and_scale",
            PropertySchema::boolean().default_value(json!(true)),
        )
}

/// Schema of the options accepted when writing a Zarr dataset.
pub fn write_data_params_schema() -> ParamsSchema {
    ParamsSchema::new("write parameters")
        .property(
            "append_dim",
            PropertySchema::string()
                .nullable()
                .description("Dimension along which to append to an existing resource"),
        )
        .property(
            "group",
            PropertySchema::string()
                .nullable()
                .description("Group path within the data resource"),
        )
        .property(
            "consolidated",
            PropertySchema::boolean().description("Write consolidated metadata"),
        )
        .property(
            "encoding",
            PropertySchema::object()
                .nullable()
                .description("Per-variable encoding, e.g. {\"chl\": {\"chunks\": [1, 90, 90]}}"),
        )
}

/// A [`DataStore`] persisting datasets as Zarr groups in a key-value storage.
pub struct ZarrDataStore {
    store_id: String,
    storage: ReadableWritableListableStorage,
    params_schema: ParamsSchema,
    read_only: bool,
    write_lock: Mutex<()>,
}

impl ZarrDataStore {
    pub fn new(
        store_id: impl Into<String>,
        storage: ReadableWritableListableStorage,
        params_schema: ParamsSchema,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            storage,
            params_schema,
            read_only: false,
            write_lock: Mutex::new(()),
        }
    }

    /// Reject writes and deletes.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn storage(&self) -> &ReadableWritableListableStorage {
        &self.storage
    }

    fn accessor_id(&self) -> String {
        DataAccessorId::zarr_dataset(self.store_id.as_str()).to_string()
    }

    fn check_accessor(&self, accessor_id: Option<&str>, role: &str) -> XcubeResult<()> {
        match accessor_id {
            Some(id) if id != self.accessor_id() => Err(XcubeError::invalid_argument(format!(
                "data {} \"{}\" is not supported by data store \"{}\"",
                role, id, self.store_id
            ))),
            _ => Ok(()),
        }
    }

    fn ensure_writable(&self) -> XcubeResult<()> {
        if self.read_only {
            return Err(XcubeError::invalid_argument(format!(
                "data store \"{}\" is read-only",
                self.store_id
            )));
        }
        Ok(())
    }

    /// `node_type` of the Zarr node at `node`, if there is one.
    fn node_type(&self, node: &str) -> XcubeResult<Option<String>> {
        let key = StoreKey::new(format!("{}/{}", relative(node), METADATA_FILE))
            .map_err(|e| XcubeError::storage(e.to_string()))?;
        let Some(bytes) = self
            .storage
            .get(&key)
            .map_err(|e| XcubeError::storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let metadata: Value = serde_json::from_slice(&bytes)?;
        Ok(metadata
            .get("node_type")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn is_group(&self, node: &str) -> XcubeResult<bool> {
        Ok(self.node_type(node)?.as_deref() == Some("group"))
    }

    /// True if `node` already holds a group or an array.
    fn is_occupied(&self, node: &str) -> XcubeResult<bool> {
        Ok(self.node_type(node)?.is_some())
    }

    fn erase(&self, prefix: &StorePrefix) -> XcubeResult<()> {
        debug!(prefix = %prefix.as_str(), "Erasing prefix");
        self.storage
            .erase_prefix(prefix)
            .map_err(|e| XcubeError::storage(e.to_string()))
    }

    fn read_dataset(&self, node: &str) -> XcubeResult<Dataset> {
        let group = Group::open(self.storage.clone(), node)
            .map_err(|e| XcubeError::storage(e.to_string()))?;
        let mut attrs = group.attributes().clone();
        let coord_names = string_list(attrs.remove(COORDINATES_ATTR));

        let listing = self
            .storage
            .list_dir(&node_prefix(node)?)
            .map_err(|e| XcubeError::storage(e.to_string()))?;

        let mut dataset = Dataset {
            attrs,
            ..Dataset::default()
        };
        for child in listing.prefixes() {
            let Some(name) = child.as_str().trim_end_matches('/').rsplit('/').next() else {
                continue;
            };
            let child_node = format!("{}/{}", node, name);
            if self.node_type(&child_node)?.as_deref() != Some("array") {
                continue;
            }
            let variable = self.read_variable(&child_node)?;
            if coord_names.iter().any(|c| c == name) {
                dataset.coords.insert(name.to_string(), variable);
            } else {
                dataset.data_vars.insert(name.to_string(), variable);
            }
        }
        Ok(dataset)
    }

    fn read_variable(&self, node: &str) -> XcubeResult<Variable> {
        let array = Array::open(self.storage.clone(), node)
            .map_err(|e| XcubeError::storage(e.to_string()))?;
        let shape = array.shape().to_vec();
        let mut attrs = array.attributes().clone();
        let mut dims = string_list(attrs.remove(ARRAY_DIMENSIONS_ATTR));
        if dims.len() != shape.len() {
            dims = (0..shape.len()).map(|i| format!("dim_{}", i)).collect();
        }

        let data = if shape.iter().product::<u64>() == 0 {
            Vec::new()
        } else {
            array
                .retrieve_array_subset_elements::<f64>(&ArraySubset::new_with_shape(
                    shape.clone(),
                ))
                .map_err(|e| XcubeError::storage(e.to_string()))?
        };
        debug!(node, ?shape, "Read variable");

        Ok(Variable {
            dims,
            shape,
            data,
            attrs,
        })
    }

    fn write_group(&self, node: &str, attrs: Attributes) -> XcubeResult<()> {
        GroupBuilder::new()
            .attributes(attrs)
            .build(self.storage.clone(), node)
            .map_err(|e| XcubeError::storage(e.to_string()))?
            .store_metadata()
            .map_err(|e| XcubeError::storage(e.to_string()))
    }

    /// Write `dataset` to `node`. `chunk_shapes` follows `dataset.variables()`.
    fn write_dataset(
        &self,
        dataset: &Dataset,
        node: &str,
        chunk_shapes: Vec<Vec<u64>>,
    ) -> XcubeResult<()> {
        let mut attrs = dataset.attrs.clone();
        attrs.insert(
            COORDINATES_ATTR.to_string(),
            json!(dataset.coords.keys().collect::<Vec<_>>()),
        );
        self.write_group(node, attrs)?;

        for ((name, variable), chunk_shape) in dataset.variables().zip(chunk_shapes) {
            self.write_variable(&format!("{}/{}", node, name), variable, chunk_shape)?;
        }
        Ok(())
    }

    fn write_variable(
        &self,
        node: &str,
        variable: &Variable,
        chunk_shape: Vec<u64>,
    ) -> XcubeResult<()> {
        let mut attrs: Attributes = variable.attrs.clone();
        attrs.insert(ARRAY_DIMENSIONS_ATTR.to_string(), json!(variable.dims));

        let chunk_grid: ChunkGrid = chunk_shape
            .try_into()
            .map_err(|e| XcubeError::storage(format!("invalid chunk grid: {:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            variable.shape.clone(),
            DataType::Float64,
            chunk_grid,
            FillValue::from(f64::NAN),
        );
        let array = binding
            .attributes(attrs)
            .build(self.storage.clone(), node)
            .map_err(|e| XcubeError::storage(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| XcubeError::storage(e.to_string()))?;

        if !variable.is_empty() {
            let subset = ArraySubset::new_with_start_shape(
                vec![0; variable.shape.len()],
                variable.shape.clone(),
            )
            .map_err(|e| XcubeError::storage(e.to_string()))?;
            array
                .store_array_subset_elements(&subset, &variable.data)
                .map_err(|e| XcubeError::storage(e.to_string()))?;
        }
        debug!(node, shape = ?variable.shape, "Wrote variable");
        Ok(())
    }
}

impl DataStore for ZarrDataStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn get_data_store_params_schema(&self) -> ParamsSchema {
        self.params_schema.clone()
    }

    fn get_open_data_params_schema(&self, opener_id: Option<&str>) -> XcubeResult<ParamsSchema> {
        self.check_accessor(opener_id, "opener")?;
        Ok(open_data_params_schema())
    }

    fn get_write_data_params_schema(&self, writer_id: Option<&str>) -> XcubeResult<ParamsSchema> {
        self.check_accessor(writer_id, "writer")?;
        Ok(write_data_params_schema())
    }

    fn get_type_ids(&self) -> Vec<String> {
        vec![TYPE_ID_DATASET.to_string()]
    }

    fn get_data_opener_ids(&self) -> Vec<String> {
        vec![self.accessor_id()]
    }

    fn get_data_writer_ids(&self) -> Vec<String> {
        vec![self.accessor_id()]
    }

    #[instrument(skip(self), fields(store = %self.store_id))]
    fn get_data_ids(&self, type_id: Option<&str>) -> XcubeResult<Vec<(String, Option<String>)>> {
        if let Some(type_id) = type_id {
            if type_id != TYPE_ID_DATASET {
                return Err(XcubeError::invalid_argument(format!(
                    "unsupported type identifier \"{}\"",
                    type_id
                )));
            }
        }

        let listing = self
            .storage
            .list_dir(&StorePrefix::root())
            .map_err(|e| XcubeError::storage(e.to_string()))?;

        let mut data_ids = Vec::new();
        for prefix in listing.prefixes() {
            let data_id = prefix.as_str().trim_end_matches('/');
            if self.is_group(&format!("/{}", data_id))? {
                data_ids.push((data_id.to_string(), None));
            }
        }
        Ok(data_ids)
    }

    fn has_data(&self, data_id: &str) -> XcubeResult<bool> {
        validate_data_id(data_id)?;
        self.is_group(&node_path(data_id, None))
    }

    #[instrument(skip(self, open_params), fields(store = %self.store_id))]
    fn open_data(
        &self,
        data_id: &str,
        opener_id: Option<&str>,
        open_params: &DataParams,
    ) -> XcubeResult<Dataset> {
        self.check_accessor(opener_id, "opener")?;
        let params = open_data_params_schema().apply_defaults(open_params)?;
        validate_data_id(data_id)?;

        let node = node_path(data_id, params.get_str("group"));
        if !self.is_group(&node)? {
            return Err(XcubeError::DataNotFound(data_id.to_string()));
        }

        let dataset = self.read_dataset(&node)?;
        let dropped = params.get_string_list("drop_variables");
        debug!(
            variables = dataset.data_vars.len(),
            dropped = dropped.len(),
            "Opened dataset"
        );
        Ok(dataset.drop_variables(&dropped))
    }

    #[instrument(skip(self, dataset, write_params), fields(store = %self.store_id))]
    fn write_data(
        &self,
        dataset: &Dataset,
        data_id: Option<&str>,
        writer_id: Option<&str>,
        replace: bool,
        write_params: &DataParams,
    ) -> XcubeResult<String> {
        self.ensure_writable()?;
        self.check_accessor(writer_id, "writer")?;
        let params = write_data_params_schema().apply_defaults(write_params)?;

        let data_id = match data_id {
            Some(data_id) => {
                validate_data_id(data_id)?;
                data_id.to_string()
            }
            None => format!("{}.zarr", Uuid::new_v4()),
        };
        let group = params.get_str("group");
        let node = node_path(&data_id, group);
        let prefix = node_prefix(&node)?;
        let encoding = params.get("encoding").cloned().unwrap_or(Value::Null);

        dataset.check_variables()?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Everything that can reject the write is resolved before the first
        // storage mutation, so a rejected write leaves the store untouched.
        let occupied = self.is_occupied(&node)?;
        let appended;
        let target = match (params.get_str("append_dim"), occupied) {
            (Some(dim), true) => {
                appended = self.read_dataset(&node)?.concat(dataset, dim)?;
                &appended
            }
            (None, true) if !replace => {
                return Err(XcubeError::conflict(
                    &data_id,
                    prefix.as_str().trim_end_matches('/'),
                ));
            }
            _ => dataset,
        };
        let chunk_shapes = target
            .variables()
            .map(|(name, variable)| chunk_shape(name, variable, encoding.get(name.as_str())))
            .collect::<XcubeResult<Vec<_>>>()?;

        let root = node_path(&data_id, None);
        let new_root = group.is_some() && !self.is_occupied(&root)?;
        if occupied {
            self.erase(&prefix)?;
        }

        let written = if new_root {
            self.write_group(&root, Attributes::new())
        } else {
            Ok(())
        };
        if let Err(e) = written.and_then(|()| self.write_dataset(target, &node, chunk_shapes)) {
            // No partial resource may remain that `has_data` would report.
            let cleanup = if new_root {
                node_prefix(&root)
            } else {
                Ok(prefix.clone())
            };
            if let Err(cleanup_error) = cleanup.and_then(|p| self.erase(&p)) {
                warn!(error = %cleanup_error, "Failed to remove partially written dataset");
            }
            return Err(e);
        }
        info!(
            data_id = %data_id,
            variables = target.data_vars.len(),
            replaced = occupied,
            "Wrote dataset"
        );
        Ok(data_id)
    }

    #[instrument(skip(self), fields(store = %self.store_id))]
    fn delete_data(&self, data_id: &str) -> XcubeResult<()> {
        self.ensure_writable()?;
        validate_data_id(data_id)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let node = node_path(data_id, None);
        if !self.is_group(&node)? {
            return Err(XcubeError::DataNotFound(data_id.to_string()));
        }
        self.erase(&node_prefix(&node)?)?;
        info!(data_id, "Deleted dataset");
        Ok(())
    }
}

impl fmt::Debug for ZarrDataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZarrDataStore")
            .field("store_id", &self.store_id)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Data ids name a top-level node: no `/`, and neither `.` nor `..`.
fn validate_data_id(data_id: &str) -> XcubeResult<()> {
    let valid = !data_id.is_empty() && !data_id.contains('/') && data_id != "." && data_id != "..";
    if valid {
        Ok(())
    } else {
        Err(XcubeError::invalid_argument(format!(
            "invalid data identifier \"{}\"",
            data_id
        )))
    }
}

/// Absolute Zarr node path of a data resource, optionally of a group within it.
fn node_path(data_id: &str, group: Option<&str>) -> String {
    match group.map(|g| g.trim_matches('/')).filter(|g| !g.is_empty()) {
        Some(group) => format!("/{}/{}", data_id, group),
        None => format!("/{}", data_id),
    }
}

fn relative(node: &str) -> &str {
    node.trim_start_matches('/')
}

fn node_prefix(node: &str) -> XcubeResult<StorePrefix> {
    StorePrefix::new(format!("{}/", relative(node))).map_err(|e| XcubeError::storage(e.to_string()))
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Chunk shape from `{"chunks": [...]}` encoding, or the full shape.
fn chunk_shape(name: &str, variable: &Variable, encoding: Option<&Value>) -> XcubeResult<Vec<u64>> {
    let Some(chunks) = encoding.and_then(|e| e.get("chunks")).filter(|c| !c.is_null()) else {
        return Ok(variable.shape.iter().map(|&n| n.max(1)).collect());
    };

    let chunks: Option<Vec<u64>> = chunks
        .as_array()
        .and_then(|items| items.iter().map(Value::as_u64).collect());
    match chunks {
        Some(chunks) if chunks.len() == variable.shape.len() && chunks.iter().all(|&c| c > 0) => {
            Ok(chunks)
        }
        _ => Err(XcubeError::invalid_params(
            "write parameters",
            format!(
                "encoding of \"{}\" needs {} positive chunk sizes",
                name,
                variable.shape.len()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path() {
        assert_eq!(node_path("cube.zarr", None), "/cube.zarr");
        assert_eq!(node_path("cube.zarr", Some("/l1/")), "/cube.zarr/l1");
        assert_eq!(node_path("cube.zarr", Some("")), "/cube.zarr");
    }

    #[test]
    fn test_validate_data_id() {
        assert!(validate_data_id("cube-1.zarr").is_ok());
        assert!(validate_data_id("").is_err());
        assert!(validate_data_id("a/b.zarr").is_err());
        assert!(validate_data_id("/cube.zarr").is_err());
        assert!(validate_data_id("..").is_err());
    }

    #[test]
    fn test_chunk_shape() {
        let variable = Variable::new(["time", "lat"], vec![0, 4], vec![]).unwrap();
        assert_eq!(chunk_shape("v", &variable, None).unwrap(), vec![1, 4]);

        let encoding = json!({"chunks": [1, 2]});
        assert_eq!(
            chunk_shape("v", &variable, Some(&encoding)).unwrap(),
            vec![1, 2]
        );

        let bad = json!({"chunks": [1]});
        assert!(chunk_shape("v", &variable, Some(&bad)).is_err());
        let zero = json!({"chunks": [0, 2]});
        assert!(chunk_shape("v", &variable, Some(&zero)).is_err());
    }

    #[test]
    fn test_schemas() {
        let open = open_data_params_schema();
        assert!(open.required.is_empty());
        assert!(open.property_names().contains("drop_variables"));
        let write = write_data_params_schema();
        assert_eq!(
            write.property_names().into_iter().collect::<Vec<_>>(),
            vec!["append_dim", "consolidated", "encoding", "group"]
        );
    }
}
