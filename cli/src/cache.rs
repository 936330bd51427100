//! Local chart cache layout.
//!
//! `$CHARTOPS_HOME` (default `$HOME/.chartops`) holds one directory per
//! package, containing the cached `package.yaml` descriptor and the extracted
//! `chart/` directory.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const HOME_ENV: &str = "CHARTOPS_HOME";
const DEFAULT_DIR_NAME: &str = ".chartops";

/// Root of the local chart cache.
pub fn cache_root() -> Result<PathBuf> {
    if let Ok(root) = env::var(HOME_ENV) {
        return Ok(PathBuf::from(root));
    }
    let home = env::var("HOME").context("neither CHARTOPS_HOME nor HOME is set")?;
    Ok(resolve_cache_root(&home))
}

fn resolve_cache_root(home: &str) -> PathBuf {
    PathBuf::from(home).join(DEFAULT_DIR_NAME)
}

/// Cache directory for one package.
pub fn package_dir(package: &str) -> Result<PathBuf> {
    Ok(cache_root()?.join(package))
}

/// Path of a package's cached descriptor.
pub fn descriptor_path(package: &str) -> Result<PathBuf> {
    Ok(package_dir(package)?.join("package.yaml"))
}

/// Path of a package's extracted chart directory.
pub fn chart_dir(package: &str) -> Result<PathBuf> {
    Ok(package_dir(package)?.join("chart"))
}
