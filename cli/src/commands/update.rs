//! `chartops update`: refresh the local chart cache from the package index.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};

use crate::archive;
use crate::cache;
use crate::fetch::fetch;
use crate::package::{Index, PackageYaml};

const INDEX_URL_ENV: &str = "CHARTOPS_INDEX_URL";
const DEFAULT_INDEX_URL: &str = "https://charts.chartops.io/index.yaml";

pub async fn run() -> Result<()> {
    let index_url = env::var(INDEX_URL_ENV).unwrap_or_else(|_| DEFAULT_INDEX_URL.to_string());

    println!("Reading package list from {}", index_url);
    let index: Index = serde_yaml::from_slice(&fetch(&index_url).await?)
        .with_context(|| format!("malformed package index at {}", index_url))?;

    for entry in &index.packages {
        let package_dir = cache::package_dir(&entry.name)?;

        println!("Removing old data from directory {}", package_dir.display());
        if package_dir.exists() {
            std::fs::remove_dir_all(&package_dir)
                .with_context(|| format!("failed to clear {}", package_dir.display()))?;
        }
        std::fs::create_dir_all(&package_dir)
            .with_context(|| format!("failed to create {}", package_dir.display()))?;

        println!("Reading package data from {}", entry.url);
        let descriptor_data = fetch(&entry.url).await?;
        let descriptor: PackageYaml = serde_yaml::from_slice(&descriptor_data)
            .with_context(|| format!("malformed descriptor for package {}", entry.name))?;
        std::fs::write(cache::descriptor_path(&entry.name)?, &descriptor_data)?;

        println!("Reading chart data from {}", descriptor.base);
        let bundle = fetch(&descriptor.base).await?;
        archive::unpack(&package_dir, &bundle)?;

        apply_patches(&package_dir, &descriptor).await?;
    }

    println!("Reading packages done");
    Ok(())
}

/// Fetches each patch into the package directory and applies it inside the
/// extracted chart.
async fn apply_patches(package_dir: &Path, descriptor: &PackageYaml) -> Result<()> {
    if descriptor.patches.is_empty() {
        return Ok(());
    }

    println!("Applying patches...");
    let chart_dir = package_dir.join("chart");
    for patch in &descriptor.patches {
        let data = fetch(&patch.url).await?;
        let patch_file = package_dir.join(&patch.name);
        std::fs::write(&patch_file, data)
            .with_context(|| format!("failed to write {}", patch_file.display()))?;

        let args = vec![
            "--no-backup-if-mismatch".to_string(),
            patch.path.clone(),
            patch_file.display().to_string(),
        ];
        super::run_external("patch", &args, Some(&chart_dir)).await?;
    }
    Ok(())
}
