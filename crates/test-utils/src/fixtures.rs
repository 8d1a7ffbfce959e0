//! Common test fixtures for xcube tests.
//!
//! Store parameters and request documents representing common scenarios.

use serde_json::{json, Map, Value};
use xcube_core::store::DataParams;

/// Common bounding boxes as `(min_lon, min_lat, max_lon, max_lat)`.
pub mod bbox {
    /// Global bounding box (-180 to 180, -90 to 90)
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, -90.0, 180.0, 90.0);

    /// Europe bounding box
    pub const EUROPE: (f64, f64, f64, f64) = (-15.0, 35.0, 45.0, 72.0);

    /// Invalid bbox (min > max)
    pub const INVALID: (f64, f64, f64, f64) = (10.0, 10.0, 5.0, 5.0);
}

/// Bucket used by the S3 tests.
pub const TEST_BUCKET: &str = "xcube-test";

/// Converts a JSON object literal into [`DataParams`].
///
/// Panics if `value` is not an object.
pub fn params(value: Value) -> DataParams {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Parameters for an empty memory store.
pub fn memory_store_params() -> DataParams {
    Map::new()
}

/// Parameters for a store against an S3-compatible test endpoint.
pub fn s3_store_params(endpoint_url: &str) -> DataParams {
    params(json!({
        "endpoint_url": endpoint_url,
        "bucket_name": TEST_BUCKET,
        "aws_access_key_id": "test_fake_id",
        "aws_secret_access_key": "test_fake_secret",
        "region_name": "eu-central-1",
    }))
}

/// A generation request writing to a memory store.
pub const SAMPLE_GEN_REQUEST_YAML: &str = r#"
input_config:
  store_id: memory
  data_id: input.zarr
cube_config:
  variable_names: [chl, tsm]
  crs: WGS84
  bbox: [-15.0, 35.0, 45.0, 72.0]
  spatial_res: 0.25
  time_range: ["2020-01-01", "2020-01-03"]
output_config:
  store_id: memory
  data_id: out.zarr
  replace: true
"#;
