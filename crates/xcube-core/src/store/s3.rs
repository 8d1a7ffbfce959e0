//! Data store over an S3-compatible object storage bucket.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use serde_json::json;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tracing::{debug, warn};
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};

use super::schema::{DataParams, DataParamsExt, ParamsSchema, PropertySchema};
use super::zarr::ZarrDataStore;
use crate::error::{XcubeError, XcubeResult};

pub const STORE_ID: &str = "s3";

const DEFAULT_REGION: &str = "us-east-1";

/// Blocking executor for the async object store.
///
/// Inside a multi-threaded tokio runtime the current runtime drives the
/// future via `block_in_place`. Anywhere else a shared I/O runtime is used.
/// Must not be called from within a current-thread runtime.
#[derive(Clone, Copy)]
pub struct TokioBlockOn {
    fallback: &'static Runtime,
}

impl TokioBlockOn {
    pub fn new() -> XcubeResult<Self> {
        Ok(Self {
            fallback: io_runtime()?,
        })
    }
}

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            _ => self.fallback.block_on(future),
        }
    }
}

fn io_runtime() -> XcubeResult<&'static Runtime> {
    static IO_RUNTIME: OnceLock<Runtime> = OnceLock::new();
    if let Some(runtime) = IO_RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("xcube-s3-io")
        .enable_all()
        .build()
        .map_err(|e| XcubeError::Internal(format!("Failed to create I/O runtime: {}", e)))?;
    Ok(IO_RUNTIME.get_or_init(|| runtime))
}

pub fn data_store_params_schema() -> ParamsSchema {
    ParamsSchema::new("s3 data store parameters")
        .property(
            "anon",
            PropertySchema::boolean()
                .default_value(json!(false))
                .description("Send unsigned requests"),
        )
        .property("aws_access_key_id", PropertySchema::string())
        .property("aws_secret_access_key", PropertySchema::string())
        .property("aws_session_token", PropertySchema::string())
        .property(
            "endpoint_url",
            PropertySchema::string().description("Endpoint of an S3-compatible service"),
        )
        .property(
            "profile_name",
            PropertySchema::string().description("Name of an AWS credentials profile"),
        )
        .property("bucket_name", PropertySchema::string())
        .property(
            "region_name",
            PropertySchema::string().default_value(json!(DEFAULT_REGION)),
        )
        .require("bucket_name")
}

/// Create a store for `params.bucket_name`.
///
/// Credentials not given explicitly are taken from the standard `AWS_*`
/// environment variables. No request is sent until the store is used.
pub fn new_data_store(params: &DataParams) -> XcubeResult<ZarrDataStore> {
    let params = data_store_params_schema().apply_defaults(params)?;
    let bucket = params.get_str("bucket_name").ok_or_else(|| {
        XcubeError::invalid_params("s3 data store parameters", "missing bucket_name")
    })?;
    let region = params.get_str("region_name").unwrap_or(DEFAULT_REGION);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(region);

    if let Some(endpoint) = params.get_str("endpoint_url") {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    if let Some(key_id) = params.get_str("aws_access_key_id") {
        builder = builder.with_access_key_id(key_id);
    }
    if let Some(secret) = params.get_str("aws_secret_access_key") {
        builder = builder.with_secret_access_key(secret);
    }
    if let Some(token) = params.get_str("aws_session_token") {
        builder = builder.with_token(token);
    }
    if params.get_bool("anon").unwrap_or(false) {
        let key: AmazonS3ConfigKey = "aws_skip_signature".parse().map_err(|_| {
            XcubeError::invalid_argument("anonymous access is not supported by this S3 client")
        })?;
        builder = builder.with_config(key, "true");
    }
    if let Some(profile) = params.get_str("profile_name") {
        warn!(profile, "AWS profiles are not resolved; using explicit or environment credentials");
    }

    let s3 = builder
        .build()
        .map_err(|e| XcubeError::storage(format!("Failed to create S3 client: {}", e)))?;
    let async_store = Arc::new(AsyncObjectStore::new(s3));
    let storage = AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn::new()?);
    debug!(bucket, region, "Created S3 data store");

    Ok(ZarrDataStore::new(
        STORE_ID,
        Arc::new(storage),
        data_store_params_schema(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_bucket_name() {
        let err = new_data_store(&DataParams::new()).unwrap_err();
        assert!(matches!(err, XcubeError::InvalidParams { .. }));
        assert!(err.to_string().contains("bucket_name"));
    }

    #[test]
    fn test_block_on_outside_runtime() {
        let block_on = TokioBlockOn::new().unwrap();
        assert_eq!(block_on.block_on(async { 41 + 1 }), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_multi_thread_runtime() {
        let block_on = TokioBlockOn::new().unwrap();
        assert_eq!(block_on.block_on(async { "ok" }), "ok");
    }
}
