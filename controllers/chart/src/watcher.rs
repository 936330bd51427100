//! Chart resource watcher.
//!
//! Runs the Chart reconcile loop on kube_runtime::Controller, which handles
//! reconnection, single-flight per resource and coalescing of queued events.
//! Debounce batches rapid edits; the error policy requeues failed Charts with
//! the reconciler's per-resource backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use tracing::{debug, error, info};

use crds::Chart;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

const DEBOUNCE: Duration = Duration::from_secs(5);

/// Upper bound on Charts reconciled concurrently by this instance.
const CONCURRENT_RECONCILES: u16 = 4;

/// Starts watching Chart resources. Runs until the stream ends.
pub async fn watch_charts(
    api: Api<Chart>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting Chart watcher");

    let error_policy = |chart: Arc<Chart>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let namespace = chart.metadata.namespace.as_deref().unwrap_or("default");
        let name = chart.metadata.name.as_deref().unwrap_or_default();
        let delay = ctx.retry_delay(namespace, name);
        error!(
            "Reconciliation error for Chart {}/{}: {} (requeue in {:?})",
            namespace, name, error, delay
        );
        Action::requeue(delay)
    };

    let reconcile = |chart: Arc<Chart>, ctx: Arc<Reconciler>| async move {
        debug!("Reconciling Chart {:?}", chart.metadata.name);
        ctx.reconcile_chart(&chart).await
    };

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(CONCURRENT_RECONCILES);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!("Controller error for Chart: {}", e);
            }
        })
        .await;

    Ok(())
}
