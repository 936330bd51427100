//! Chart reconciliation loop.
//!
//! One pass runs the per-Chart state machine
//! `Pending -> Generating -> Applying -> Settled`, writing each phase to the
//! Chart's status. A malformed spec lands in `Failed` and stays there until
//! the spec is edited; an apply failure drops back to `Pending` and is
//! requeued with per-resource exponential backoff.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use kube_runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crds::{
    Chart, ChartCondition, ChartPhase, ChartStatus, CONDITION_GENERATED, CONDITION_JOB_DEPLOYED,
};

use crate::apply::ApplyEngine;
use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;
use crate::generate::{generate, GeneratorConfig};

const BACKOFF_MIN_SECONDS: u64 = 60;
const BACKOFF_MAX_SECONDS: u64 = 600;

/// Per-resource retry backoff, keyed by `namespace/name`.
///
/// Consulted by the watcher's error policy when a pass fails; reset when a
/// pass settles.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    states: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl BackoffTracker {
    /// Next delay for a resource that just failed.
    pub fn next_delay(&self, namespace: &str, name: &str) -> Duration {
        let key = format!("{}/{}", namespace, name);
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .entry(key)
            .or_insert_with(|| ExponentialBackoff::new(BACKOFF_MIN_SECONDS, BACKOFF_MAX_SECONDS))
            .next_backoff()
    }

    /// Forget a resource's error history after a successful pass.
    pub fn reset(&self, namespace: &str, name: &str) {
        let key = format!("{}/{}", namespace, name);
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.remove(&key);
    }
}

/// Reconciles Chart resources.
pub struct Reconciler {
    client: Client,
    config: GeneratorConfig,
    engine: ApplyEngine,
    backoff: BackoffTracker,
}

impl Reconciler {
    pub fn new(client: Client, config: GeneratorConfig, engine: ApplyEngine) -> Self {
        Self {
            client,
            config,
            engine,
            backoff: BackoffTracker::default(),
        }
    }

    /// One full generate-then-apply pass for a Chart.
    pub async fn reconcile_chart(&self, chart: &Chart) -> Result<Action, ControllerError> {
        let name = chart
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("Chart missing name".to_string()))?;
        let namespace = chart.metadata.namespace.as_deref().unwrap_or("default");

        if chart.metadata.deletion_timestamp.is_some() {
            // Owner references cascade the children; nothing to clean here.
            debug!("Chart {}/{} is terminating, skipping", namespace, name);
            return Ok(Action::await_change());
        }

        info!("Reconciling Chart {}/{}", namespace, name);
        let api: Api<Chart> = Api::namespaced(self.client.clone(), namespace);

        let mut status = chart.status.clone().unwrap_or_default();
        status.phase = ChartPhase::Generating;
        self.patch_status(&api, name, &status).await?;

        let (desired, generated_status) = match generate(chart, &self.config, &status) {
            Ok(result) => result,
            Err(e) => {
                // Spec error: terminal for this spec generation, no requeue.
                // An edit to the Chart re-enters the loop from Pending.
                warn!("Chart {}/{} has a malformed spec: {}", namespace, name, e);
                status.phase = ChartPhase::Failed;
                status.error = Some(e.to_string());
                status.set_condition(ChartCondition::unmet(CONDITION_GENERATED, e.to_string()));
                self.patch_status(&api, name, &status).await?;
                self.backoff.reset(namespace, name);
                return Ok(Action::await_change());
            }
        };

        let mut status = generated_status;
        status.phase = ChartPhase::Applying;
        self.patch_status(&api, name, &status).await?;

        if let Err(e) = self.engine.reconcile(chart, desired).await {
            error!("Apply failed for Chart {}/{}: {}", namespace, name, e);
            status.phase = ChartPhase::Pending;
            status.error = Some(e.to_string());
            status.set_condition(ChartCondition::unmet(CONDITION_JOB_DEPLOYED, e.to_string()));
            self.patch_status(&api, name, &status).await?;
            return Err(ControllerError::Apply(e));
        }

        status.phase = ChartPhase::Settled;
        status.error = None;
        status.set_condition(ChartCondition::met(CONDITION_JOB_DEPLOYED));
        self.patch_status(&api, name, &status).await?;
        self.backoff.reset(namespace, name);

        info!("Chart {}/{} settled", namespace, name);
        Ok(Action::await_change())
    }

    /// Delay before the next attempt for a Chart that just failed.
    pub fn retry_delay(&self, namespace: &str, name: &str) -> Duration {
        self.backoff.next_delay(namespace, name)
    }

    async fn patch_status(
        &self,
        api: &Api<Chart>,
        name: &str,
        status: &ChartStatus,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_per_resource_and_resets_on_success() {
        let tracker = BackoffTracker::default();

        assert_eq!(tracker.next_delay("ns", "a"), Duration::from_secs(60));
        assert_eq!(tracker.next_delay("ns", "a"), Duration::from_secs(120));
        assert_eq!(tracker.next_delay("ns", "a"), Duration::from_secs(240));

        // Independent resources do not share error history
        assert_eq!(tracker.next_delay("ns", "b"), Duration::from_secs(60));

        tracker.reset("ns", "a");
        assert_eq!(tracker.next_delay("ns", "a"), Duration::from_secs(60));
    }

    #[test]
    fn backoff_is_capped() {
        let tracker = BackoffTracker::default();
        for _ in 0..10 {
            tracker.next_delay("ns", "a");
        }
        assert_eq!(tracker.next_delay("ns", "a"), Duration::from_secs(600));
    }
}
