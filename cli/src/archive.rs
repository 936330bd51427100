//! Chart bundle extraction.
//!
//! Bundles are gzipped tar archives; extraction preserves the archive's
//! directory layout under the package's cache directory.

use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

/// Unpacks a gzipped tar bundle into `base_dir`.
pub fn unpack(base_dir: &Path, data: &[u8]) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(data));
    archive
        .unpack(base_dir)
        .with_context(|| format!("failed to extract chart bundle into {}", base_dir.display()))
}
