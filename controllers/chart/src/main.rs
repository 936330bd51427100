//! Chart Controller
//!
//! Watches `Chart` custom resources and drives their installation: for each
//! Chart it generates a service account, optional RBAC objects and a one-shot
//! installer job, then converges the cluster onto that desired set.
//!
//! Jobs are immutable once created, so a spec change replaces the job via
//! delete-then-recreate instead of an in-place patch.

mod apply;
mod backoff;
mod controller;
mod error;
mod generate;
mod leader;
mod names;
mod objects;
mod patch_policy;
mod reconciler;
mod throttle;
mod watcher;

#[cfg(test)]
mod test_utils;

use std::env;
use std::sync::Arc;

use tracing::{info, warn};

use crate::controller::Controller;
use crate::error::ControllerError;
use crate::generate::GeneratorConfig;
use crate::leader::LeaderElector;

const LEASE_NAME: &str = "chart-controller";
const DEFAULT_INSTALLER_IMAGE: &str = "chartops/helm-install:latest";

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting chart controller");

    // Ensure rustls uses the ring provider explicitly.
    // This avoids runtime errors when no default provider is set.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    ) {
        warn!("CryptoProvider already installed; proceeding: {:?}", e);
    }

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let insecure = env::var("CHART_RBAC_INSECURE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let installer_image = env::var("CHART_INSTALLER_IMAGE")
        .unwrap_or_else(|_| DEFAULT_INSTALLER_IMAGE.to_string());
    let controller_namespace =
        env::var("POD_NAMESPACE").unwrap_or_else(|_| "kube-system".to_string());
    let identity = env::var("HOSTNAME").unwrap_or_else(|_| LEASE_NAME.to_string());

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  RBAC insecure mode: {}", insecure);
    info!("  Installer image: {}", installer_image);

    let config = GeneratorConfig {
        insecure,
        installer_image,
    };

    // Only the elected instance runs the reconciliation loop
    let client = kube::Client::try_default().await.map_err(ControllerError::Kube)?;
    let elector = Arc::new(LeaderElector::new(
        client,
        &controller_namespace,
        LEASE_NAME,
        &identity,
    ));
    elector.acquire().await?;
    let renewal = tokio::spawn(elector.keep_renewing());

    let controller = Controller::new(namespace, config).await?;
    tokio::select! {
        result = controller.run() => result,
        result = renewal => {
            result.map_err(|e| ControllerError::Watch(format!("lease renewal task panicked: {}", e)))?
        }
    }
}
