//! Shared test helpers.

use std::{future::Future, path::PathBuf};

use temp_dir::TempDir;

/// Runs `f` with a fresh temporary directory.
///
/// # Panics
///
/// Will panic if the temp directory cannot be created.
pub fn with_temp_dir<F, V>(f: F) -> V
where
    F: FnOnce(PathBuf) -> V,
{
    let dir = TempDir::with_prefix("granary")
        .expect("cannot recover from failure to create temp dir");
    f(dir.path().to_path_buf())
}

/// Runs an async closure with a fresh temporary directory.
pub async fn with_temp_dir_async<F, Fut, V>(f: F) -> V
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = V>,
{
    let dir = TempDir::with_prefix("granary")
        .expect("cannot recover from failure to create temp dir");
    f(dir.path().to_path_buf()).await
}
