//! Cube generation steps: open the input, shape the cube, write the output.

use serde_json::{json, Value};
use tracing::{info, instrument};
use xcube_core::progress::ProgressContext;
use xcube_core::store::{DataStore, Dataset};
use xcube_core::{XcubeError, XcubeResult};

use crate::config::{CubeConfig, GenConfig, InputConfig, OutputConfig};
use crate::storeconfig::StorePool;

/// Open the input dataset described by `input_config`.
pub fn open_cube(
    context: &ProgressContext,
    pool: &StorePool,
    input_config: &InputConfig,
) -> XcubeResult<Dataset> {
    context.run("Opening input", 1.0, |progress| {
        let store = match (&input_config.store_id, &input_config.opener_id) {
            (Some(store_id), _) => pool.get_data_store(store_id, &input_config.store_params)?,
            (None, Some(opener_id)) => {
                pool.get_data_store_for_accessor(opener_id, &input_config.store_params)?
            }
            (None, None) => {
                return Err(XcubeError::ConfigError(
                    "input_config: one of store_id or opener_id must be given".to_string(),
                ))
            }
        };
        let cube = store.open_data(
            &input_config.data_id,
            input_config.opener_id.as_deref(),
            &input_config.open_params,
        )?;
        progress.worked(1.0)?;
        Ok(cube)
    })
}

/// Restrict `cube` to the requested variables and record the cube's extent
/// in its attributes.
pub fn transform_cube(cube: Dataset, cube_config: &CubeConfig) -> XcubeResult<Dataset> {
    let mut cube = match &cube_config.variable_names {
        Some(names) => cube.select_variables(names.as_slice())?,
        None => cube,
    };
    for (key, value) in cube_attrs(cube_config) {
        cube = cube.with_attr(key, value);
    }
    Ok(cube)
}

fn cube_attrs(cube_config: &CubeConfig) -> Vec<(&'static str, Value)> {
    let mut attrs = Vec::new();
    if let Some(crs) = &cube_config.crs {
        attrs.push(("crs", json!(crs)));
    }
    if let Some([x1, y1, x2, y2]) = cube_config.bbox {
        attrs.push(("geospatial_lon_min", json!(x1)));
        attrs.push(("geospatial_lat_min", json!(y1)));
        attrs.push(("geospatial_lon_max", json!(x2)));
        attrs.push(("geospatial_lat_max", json!(y2)));
    }
    if let Some(res) = cube_config.spatial_res {
        attrs.push(("geospatial_lon_resolution", json!(res)));
        attrs.push(("geospatial_lat_resolution", json!(res)));
    }
    if let Some([start, end]) = &cube_config.time_range {
        if let Some(start) = start {
            attrs.push(("time_coverage_start", json!(start)));
        }
        if let Some(end) = end {
            attrs.push(("time_coverage_end", json!(end)));
        }
    }
    if let Some(period) = &cube_config.time_period {
        attrs.push(("time_coverage_resolution", json!(period)));
    }
    attrs
}

/// Write `cube` as described by `output_config` and return its data id.
pub fn write_cube(
    context: &ProgressContext,
    pool: &StorePool,
    output_config: &OutputConfig,
    cube: &Dataset,
) -> XcubeResult<String> {
    context.run("Writing output", 1.0, |progress| {
        let store = output_store(pool, output_config)?;
        let data_id = store.write_data(
            cube,
            output_config.data_id.as_deref(),
            output_config.writer_id.as_deref(),
            output_config.replace,
            &output_config.write_params,
        )?;
        progress.worked(1.0)?;
        Ok(data_id)
    })
}

fn output_store(
    pool: &StorePool,
    output_config: &OutputConfig,
) -> XcubeResult<std::sync::Arc<dyn DataStore>> {
    match (&output_config.store_id, &output_config.writer_id) {
        (Some(store_id), _) => pool.get_data_store(store_id, &output_config.store_params),
        (None, Some(writer_id)) => {
            pool.get_data_store_for_accessor(writer_id, &output_config.store_params)
        }
        (None, None) => Err(XcubeError::ConfigError(
            "output_config: one of store_id or writer_id must be given".to_string(),
        )),
    }
}

/// Run a whole request and return the data id of the written cube.
#[instrument(skip_all, fields(input = %config.input_config.data_id))]
pub fn generate_cube(
    context: &ProgressContext,
    pool: &StorePool,
    config: &GenConfig,
) -> XcubeResult<String> {
    context.run("Generating cube", 100.0, |progress| {
        // Nested scopes report their work to this one.
        progress.will_work(20.0)?;
        let cube = open_cube(context, pool, &config.input_config)?;
        let cube = transform_cube(cube, &config.cube_config)?;

        progress.will_work(80.0)?;
        let data_id = write_cube(context, pool, &config.output_config, &cube)?;

        info!(data_id = %data_id, "Generated cube");
        Ok(data_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use test_utils::generators::new_cube;
    use xcube_core::progress::ProgressObserverRegistry;
    use xcube_core::store::DataParams;

    fn context() -> ProgressContext {
        ProgressContext::new(Arc::new(ProgressObserverRegistry::new()))
    }

    #[test]
    fn test_transform_selects_variables_and_stamps_extent() {
        let cube = new_cube(&[("chl", 1.0), ("tsm", 2.0), ("kd", 3.0)]);
        let cube_config = CubeConfig {
            variable_names: Some(vec!["chl".to_string()]),
            bbox: Some([0.0, 50.0, 5.0, 52.5]),
            time_range: Some([Some("2020-01-01".to_string()), None]),
            ..Default::default()
        };
        let cube = transform_cube(cube, &cube_config).unwrap();

        assert!(cube.variable("chl").is_some());
        assert!(cube.variable("tsm").is_none());
        assert!(cube.variable("lat").is_some());
        assert_eq!(cube.attrs["geospatial_lat_max"], json!(52.5));
        assert_eq!(cube.attrs["time_coverage_start"], json!("2020-01-01"));
        assert!(!cube.attrs.contains_key("time_coverage_end"));
    }

    #[test]
    fn test_transform_rejects_unknown_variable() {
        let cube_config = CubeConfig {
            variable_names: Some(vec!["sst".to_string()]),
            ..Default::default()
        };
        assert!(transform_cube(new_cube(&[("chl", 1.0)]), &cube_config).is_err());
    }

    #[test]
    fn test_write_cube_by_writer_id() {
        let pool = StorePool::default();
        let output_config = OutputConfig {
            writer_id: Some("dataset:zarr:memory".to_string()),
            data_id: Some("cube.zarr".to_string()),
            ..Default::default()
        };
        let data_id = write_cube(&context(), &pool, &output_config, &new_cube(&[("chl", 1.0)]))
            .unwrap();
        assert_eq!(data_id, "cube.zarr");
    }

    #[test]
    fn test_write_cube_rejects_foreign_writer() {
        let mut pool = StorePool::default();
        let store = pool
            .registry()
            .new_data_store("memory", &DataParams::new())
            .unwrap();
        pool.insert("scratch", store);
        let output_config = OutputConfig {
            store_id: Some("@scratch".to_string()),
            writer_id: Some("dataset:zarr:s3".to_string()),
            ..Default::default()
        };
        let result = write_cube(&context(), &pool, &output_config, &new_cube(&[("chl", 1.0)]));
        assert!(matches!(result, Err(XcubeError::InvalidArgument(_))));
    }
}
