//! Path utilities for tests writing to the local filesystem.

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;
use xcube_core::store::DataParams;

use crate::fixtures::params;

/// Returns the workspace root directory.
///
/// This is determined by walking up from the test-utils manifest directory.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Creates a temporary directory to root a file store in.
///
/// The directory is removed when the returned guard is dropped.
pub fn temp_store_root() -> TempDir {
    tempfile::Builder::new()
        .prefix("xcube-store-")
        .tempdir()
        .expect("failed to create temporary store root")
}

/// Parameters for a file store rooted at `root`.
pub fn file_store_params(root: &Path) -> DataParams {
    params(json!({ "root": root.to_string_lossy() }))
}
