//! Common test utilities
#![allow(dead_code)]

use ctask::config::load_manifest;
use ctask::runner::{Context, FingerprintCache, Manifest, Verbosity};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a temporary directory with a manifest file of the given name
pub fn create_test_manifest(file_name: &str, content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let manifest_path = temp_dir.path().join(file_name);
    fs::write(&manifest_path, content).unwrap();
    (temp_dir, manifest_path)
}

/// Create a test manifest with an empty subdirectory next to it
pub fn create_test_manifest_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, manifest_path) = create_test_manifest("ctask.yml", content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, manifest_path, sub_dir)
}

/// Load a manifest and a silent context pointing at it
pub fn load_project(manifest_path: &Path) -> (Manifest, Context) {
    let manifest = load_manifest(manifest_path).unwrap();
    let mut context = Context::new().with_verbosity(Verbosity::Silent);
    if let Some(path) = &manifest.path {
        context = context.with_manifest_path(path.clone());
    }
    (manifest, context)
}

/// A fingerprint cache in its own scratch directory
pub fn scratch_cache() -> (TempDir, FingerprintCache) {
    let dir = TempDir::new().unwrap();
    let cache = FingerprintCache::new(dir.path().to_path_buf());
    (dir, cache)
}

/// Read a file written by a task, as a string
pub fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap_or_default()
}
