//! CLI subcommand implementations.

pub mod delete;
pub mod install;
pub mod purge;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::cache;
use crate::package::PackageYaml;

/// Loads a package's cached descriptor.
fn load_descriptor(package: &str) -> Result<PackageYaml> {
    let path = cache::descriptor_path(package)?;
    let data = std::fs::read(&path)
        .with_context(|| format!("can't locate package {}. Run `chartops update`", package))?;
    serde_yaml::from_slice(&data)
        .with_context(|| format!("malformed descriptor at {}", path.display()))
}

/// Writes manifest text to a temp file and returns its path.
fn write_manifest_temp(package: &str, suffix: &str, manifest: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!(
        "{}-{}-{}.yaml",
        package,
        suffix,
        std::process::id()
    ));
    std::fs::write(&path, manifest)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Runs an external command, printing its combined output. Fails on a
/// non-zero exit status.
async fn run_external(program: &str, args: &[String], dir: Option<&Path>) -> Result<()> {
    debug!("Running {} {:?}", program, args);
    let mut command = tokio::process::Command::new(program);
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .await
        .with_context(|| format!("failed to run {}", program))?;

    print!("{}", String::from_utf8_lossy(&output.stdout));
    eprint!("{}", String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        bail!("{} exited with {}", program, output.status);
    }
    Ok(())
}
