//! `chartops install`: install or upgrade a cached package with helm.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::cache;
use crate::package::{PackageYaml, Profile};

pub async fn run(
    package: &str,
    profile: Option<&str>,
    update_crd_only: bool,
    custom_options: &[String],
) -> Result<()> {
    let descriptor = super::load_descriptor(package)?;

    if update_crd_only {
        if descriptor.crd_manifest.is_empty() {
            bail!("package {} has no CRD manifest", package);
        }
        println!("Upgrading CRDs");
        let manifest = super::write_manifest_temp(package, "crd", &descriptor.crd_manifest)?;
        let args = vec![
            "apply".to_string(),
            "-f".to_string(),
            manifest.display().to_string(),
        ];
        return super::run_external("kubectl", &args, None).await;
    }

    println!("Installing helm release {}", package);
    let values = selected_profile(&descriptor, profile)?
        .map(|p| p.value_yaml.clone())
        .unwrap_or_default();
    let values_path = super::write_manifest_temp(package, "value", &values)?;

    let chart_dir = cache::chart_dir(package)?;
    let args = helm_install_args(package, &values_path, &descriptor, custom_options, &chart_dir);
    super::run_external("helm", &args, None).await
}

/// The requested profile, or the descriptor's default one.
///
/// Asking for a profile the descriptor does not define is an error; having no
/// profiles at all just means an empty values file.
fn selected_profile<'a>(
    descriptor: &'a PackageYaml,
    requested: Option<&str>,
) -> Result<Option<&'a Profile>> {
    match requested {
        Some(name) => descriptor
            .profiles
            .get(name)
            .map(Some)
            .with_context(|| format!("no profile named {} in this package", name)),
        None => Ok(descriptor.profiles.values().find(|p| p.default)),
    }
}

/// `helm upgrade --values <file> [--set registryKey=registry] [custom...]
/// --install <package> <chart-dir>`
fn helm_install_args(
    package: &str,
    values_path: &Path,
    descriptor: &PackageYaml,
    custom_options: &[String],
    chart_dir: &Path,
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--values".to_string(),
        values_path.display().to_string(),
    ];
    if descriptor.private_registry.is_configured() {
        args.push("--set".to_string());
        args.push(format!(
            "{}={}",
            descriptor.private_registry.key, descriptor.private_registry.registry
        ));
    }
    args.extend(custom_options.iter().cloned());
    args.push("--install".to_string());
    args.push(package.to_string());
    args.push(chart_dir.display().to_string());
    args
}
