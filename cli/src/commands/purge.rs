//! `chartops purge`: remove the CRD configuration a package installed.

use anyhow::Result;

pub async fn run(package: &str) -> Result<()> {
    let descriptor = super::load_descriptor(package)?;

    if descriptor.crd_manifest.is_empty() {
        println!("Package {} has no CRD manifest", package);
        return Ok(());
    }

    println!("Purging CRDs");
    let manifest = super::write_manifest_temp(package, "crd", &descriptor.crd_manifest)?;
    let args = vec![
        "delete".to_string(),
        "-f".to_string(),
        manifest.display().to_string(),
    ];
    super::run_external("kubectl", &args, None).await
}
