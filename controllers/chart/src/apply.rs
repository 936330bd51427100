//! Apply/reconcile engine.
//!
//! `plan` is a pure function from (desired, live) to the minimal operation
//! set; `ApplyEngine` executes a plan against the cluster. Operations on
//! distinct identities run concurrently behind a shared rate limiter, while a
//! recreate holds delete and create of the same identity inside one future so
//! per-identity ordering is strict. Per-object failures are collected rather
//! than aborting the pass; the next pass re-plans from live state, so retries
//! converge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crds::Chart;

use crate::objects::{ObjectKey, ObjectKind, OwnedObject, OWNED_BY_LABEL, OWNER_NAMESPACE_LABEL};
use crate::patch_policy::{strategy_for, PatchStrategy};
use crate::throttle::RateLimiter;

/// Field manager recorded on server-side apply patches.
const FIELD_MANAGER: &str = "chart-controller";

/// Operations on distinct identities issued concurrently per pass.
const MAX_IN_FLIGHT: usize = 4;

/// How long a recreate waits for the old object to be fully gone.
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from applying a desired set to the cluster.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An object with the expected name exists but belongs to someone else.
    /// Never adopted, never clobbered.
    #[error("object {0} exists but is not owned by this Chart")]
    OwnershipConflict(ObjectKey),

    /// The old object outlived the deletion wait during a recreate
    #[error("timed out waiting for {0} to be deleted")]
    DeleteTimeout(ObjectKey),

    /// An in-place update was requested for an immutable kind
    #[error("refusing in-place update of immutable {0}")]
    ImmutableUpdate(ObjectKey),

    /// Object could not be serialized into a patch
    #[error("failed to serialize object: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Aggregated per-object failures for one pass
    #[error("{failed} of {total} objects failed to converge: {details}")]
    Aggregate {
        failed: usize,
        total: usize,
        details: String,
    },
}

/// One operation against a single object identity.
#[derive(Debug, Clone)]
pub enum ObjectOp {
    Create(OwnedObject),
    Update(OwnedObject),
    Recreate(OwnedObject),
    Delete(ObjectKey),
}

impl ObjectOp {
    pub fn key(&self) -> ObjectKey {
        match self {
            ObjectOp::Create(o) | ObjectOp::Update(o) | ObjectOp::Recreate(o) => o.key(),
            ObjectOp::Delete(key) => key.clone(),
        }
    }
}

/// Computes the operations that converge `live` onto `desired`.
///
/// Objects are indexed by (kind, namespace, name). Divergence is detected by
/// comparing spec hashes; a live object without a hash annotation counts as
/// divergent. The patch policy decides whether a divergent object is updated
/// in place or deleted and recreated. Live objects with no desired
/// counterpart are pruned.
pub fn plan(desired: &[OwnedObject], live: &[OwnedObject]) -> Vec<ObjectOp> {
    let live_by_key: HashMap<ObjectKey, &OwnedObject> =
        live.iter().map(|o| (o.key(), o)).collect();
    let desired_keys: HashSet<ObjectKey> = desired.iter().map(OwnedObject::key).collect();

    let mut ops = Vec::new();
    for object in desired {
        match live_by_key.get(&object.key()) {
            None => ops.push(ObjectOp::Create(object.clone())),
            Some(existing) => {
                if existing.spec_hash().is_some() && existing.spec_hash() == object.spec_hash() {
                    continue;
                }
                match strategy_for(object.kind()) {
                    PatchStrategy::UpdateInPlace => ops.push(ObjectOp::Update(object.clone())),
                    PatchStrategy::DeleteThenRecreate => {
                        ops.push(ObjectOp::Recreate(object.clone()));
                    }
                }
            }
        }
    }
    for object in live {
        if !desired_keys.contains(&object.key()) {
            ops.push(ObjectOp::Delete(object.key()));
        }
    }
    ops
}

/// Executes plans against the cluster API.
pub struct ApplyEngine {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl ApplyEngine {
    pub fn new(client: Client, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    /// Lists live state, plans and executes one pass for a Chart.
    pub async fn reconcile(&self, chart: &Chart, desired: Vec<OwnedObject>) -> Result<(), ApplyError> {
        let live = self.list_owned(chart).await?;
        let ops = plan(&desired, &live);
        self.execute(chart, ops).await
    }

    /// Executes a plan. A failure on one object does not abort the others;
    /// the pass result aggregates every failure.
    pub async fn execute(&self, chart: &Chart, ops: Vec<ObjectOp>) -> Result<(), ApplyError> {
        if ops.is_empty() {
            debug!("Nothing to apply; live set already matches desired set");
            return Ok(());
        }

        let total = ops.len();
        let results: Vec<(ObjectKey, Result<(), ApplyError>)> =
            futures::stream::iter(ops.into_iter().map(|op| {
                let key = op.key();
                async move { (key, self.execute_op(chart, op).await) }
            }))
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let failures: Vec<String> = results
            .iter()
            .filter_map(|(key, result)| {
                result.as_ref().err().map(|e| format!("{}: {}", key, e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ApplyError::Aggregate {
                failed: failures.len(),
                total,
                details: failures.join("; "),
            })
        }
    }

    async fn execute_op(&self, chart: &Chart, op: ObjectOp) -> Result<(), ApplyError> {
        match op {
            ObjectOp::Create(object) => self.create(chart, object).await,
            ObjectOp::Update(object) => self.update(object).await,
            ObjectOp::Recreate(object) => {
                // Two live objects of the same identity cannot coexist:
                // the delete must be confirmed before the create is issued.
                let key = object.key();
                self.delete(&key).await?;
                self.await_deletion(&key).await?;
                self.create(chart, object).await
            }
            ObjectOp::Delete(key) => self.delete(&key).await,
        }
    }

    /// Lists every object currently owned by the Chart, across all six kinds.
    pub async fn list_owned(&self, chart: &Chart) -> Result<Vec<OwnedObject>, ApplyError> {
        let chart_name = chart.metadata.name.as_deref().unwrap_or_default();
        let chart_namespace = chart.metadata.namespace.as_deref().unwrap_or("default");
        let selector = format!(
            "{}={},{}={}",
            OWNED_BY_LABEL, chart_name, OWNER_NAMESPACE_LABEL, chart_namespace
        );
        let lp = ListParams::default().labels(&selector);

        let mut owned: Vec<OwnedObject> = Vec::new();
        owned.extend(
            self.list_typed::<ServiceAccount>(Api::namespaced(self.client.clone(), chart_namespace), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        owned.extend(
            self.list_typed::<Role>(Api::namespaced(self.client.clone(), chart_namespace), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        owned.extend(
            self.list_typed::<ClusterRole>(Api::all(self.client.clone()), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        owned.extend(
            self.list_typed::<RoleBinding>(Api::namespaced(self.client.clone(), chart_namespace), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        owned.extend(
            self.list_typed::<ClusterRoleBinding>(Api::all(self.client.clone()), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        owned.extend(
            self.list_typed::<Job>(Api::namespaced(self.client.clone(), chart_namespace), &lp)
                .await?
                .into_iter()
                .map(OwnedObject::from),
        );
        Ok(owned)
    }

    async fn list_typed<K>(&self, api: Api<K>, lp: &ListParams) -> Result<Vec<K>, ApplyError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.limiter.acquire().await;
        Ok(api.list(lp).await?.items)
    }

    async fn create(&self, chart: &Chart, object: OwnedObject) -> Result<(), ApplyError> {
        let key = object.key();
        let namespace = key.namespace.clone().unwrap_or_else(|| "default".to_string());
        match object {
            OwnedObject::ServiceAccount(o) => {
                self.create_typed(Api::namespaced(self.client.clone(), &namespace), o, chart, &key)
                    .await
            }
            OwnedObject::Role(o) => {
                self.create_typed(Api::namespaced(self.client.clone(), &namespace), o, chart, &key)
                    .await
            }
            OwnedObject::ClusterRole(o) => {
                self.create_typed(Api::all(self.client.clone()), o, chart, &key).await
            }
            OwnedObject::RoleBinding(o) => {
                self.create_typed(Api::namespaced(self.client.clone(), &namespace), o, chart, &key)
                    .await
            }
            OwnedObject::ClusterRoleBinding(o) => {
                self.create_typed(Api::all(self.client.clone()), o, chart, &key).await
            }
            OwnedObject::Job(o) => {
                self.create_typed(Api::namespaced(self.client.clone(), &namespace), o, chart, &key)
                    .await
            }
        }
    }

    async fn create_typed<K>(
        &self,
        api: Api<K>,
        object: K,
        chart: &Chart,
        key: &ObjectKey,
    ) -> Result<(), ApplyError>
    where
        K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.limiter.acquire().await;
        match api.create(&PostParams::default(), &object).await {
            Ok(_) => {
                info!("Created {}", key);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                // Name taken. If it carries our ownership labels the informer
                // was behind and the next pass will reconcile it; otherwise
                // the object belongs to someone else and must not be touched.
                self.limiter.acquire().await;
                let existing = api.get(&key.name).await?;
                let chart_name = chart.metadata.name.as_deref().unwrap_or_default();
                let chart_namespace = chart.metadata.namespace.as_deref().unwrap_or("default");
                let owned = existing.labels().get(OWNED_BY_LABEL).map(String::as_str)
                    == Some(chart_name)
                    && existing.labels().get(OWNER_NAMESPACE_LABEL).map(String::as_str)
                        == Some(chart_namespace);
                if owned {
                    warn!("{} already exists and is owned by this Chart; retrying next pass", key);
                    Err(ApplyError::Kube(kube::Error::Api(err)))
                } else {
                    Err(ApplyError::OwnershipConflict(key.clone()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, object: OwnedObject) -> Result<(), ApplyError> {
        let key = object.key();
        let namespace = key.namespace.clone().unwrap_or_else(|| "default".to_string());
        let payload = apply_payload(&object)?;
        match &key.kind {
            ObjectKind::ServiceAccount => {
                self.patch_typed::<ServiceAccount>(
                    Api::namespaced(self.client.clone(), &namespace),
                    payload,
                    &key,
                )
                .await
            }
            ObjectKind::Role => {
                self.patch_typed::<Role>(Api::namespaced(self.client.clone(), &namespace), payload, &key)
                    .await
            }
            ObjectKind::ClusterRole => {
                self.patch_typed::<ClusterRole>(Api::all(self.client.clone()), payload, &key)
                    .await
            }
            ObjectKind::RoleBinding => {
                self.patch_typed::<RoleBinding>(
                    Api::namespaced(self.client.clone(), &namespace),
                    payload,
                    &key,
                )
                .await
            }
            ObjectKind::ClusterRoleBinding => {
                self.patch_typed::<ClusterRoleBinding>(Api::all(self.client.clone()), payload, &key)
                    .await
            }
            ObjectKind::Job => {
                // plan() never routes a Job here; divergent Jobs go through
                // delete-then-recreate.
                Err(ApplyError::ImmutableUpdate(key.clone()))
            }
        }
    }

    async fn patch_typed<K>(
        &self,
        api: Api<K>,
        payload: serde_json::Value,
        key: &ObjectKey,
    ) -> Result<(), ApplyError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.limiter.acquire().await;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&key.name, &params, &Patch::Apply(&payload)).await?;
        info!("Updated {}", key);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ApplyError> {
        let namespace = key.namespace.clone().unwrap_or_else(|| "default".to_string());
        match key.kind {
            ObjectKind::ServiceAccount => {
                self.delete_typed::<ServiceAccount>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::Role => {
                self.delete_typed::<Role>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::ClusterRole => {
                self.delete_typed::<ClusterRole>(Api::all(self.client.clone()), key).await
            }
            ObjectKind::RoleBinding => {
                self.delete_typed::<RoleBinding>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::ClusterRoleBinding => {
                self.delete_typed::<ClusterRoleBinding>(Api::all(self.client.clone()), key)
                    .await
            }
            ObjectKind::Job => {
                self.delete_typed::<Job>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
        }
    }

    async fn delete_typed<K>(&self, api: Api<K>, key: &ObjectKey) -> Result<(), ApplyError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.limiter.acquire().await;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted {}", key);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Polls until the object is fully gone, bounded by [`DELETE_TIMEOUT`].
    async fn await_deletion(&self, key: &ObjectKey) -> Result<(), ApplyError> {
        let wait = tokio::time::timeout(DELETE_TIMEOUT, async {
            loop {
                if !self.exists(key).await? {
                    return Ok(());
                }
                tokio::time::sleep(DELETE_POLL_INTERVAL).await;
            }
        })
        .await;
        match wait {
            Ok(result) => result,
            Err(_) => Err(ApplyError::DeleteTimeout(key.clone())),
        }
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, ApplyError> {
        let namespace = key.namespace.clone().unwrap_or_else(|| "default".to_string());
        match key.kind {
            ObjectKind::ServiceAccount => {
                self.exists_typed::<ServiceAccount>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::Role => {
                self.exists_typed::<Role>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::ClusterRole => {
                self.exists_typed::<ClusterRole>(Api::all(self.client.clone()), key).await
            }
            ObjectKind::RoleBinding => {
                self.exists_typed::<RoleBinding>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
            ObjectKind::ClusterRoleBinding => {
                self.exists_typed::<ClusterRoleBinding>(Api::all(self.client.clone()), key)
                    .await
            }
            ObjectKind::Job => {
                self.exists_typed::<Job>(Api::namespaced(self.client.clone(), &namespace), key)
                    .await
            }
        }
    }

    async fn exists_typed<K>(&self, api: Api<K>, key: &ObjectKey) -> Result<bool, ApplyError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        self.limiter.acquire().await;
        Ok(api.get_opt(&key.name).await?.is_some())
    }
}

/// Server-side apply payload: the object plus the apiVersion/kind pair the
/// typed structs do not carry themselves.
fn apply_payload(object: &OwnedObject) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = object.to_json()?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(api_version(object.kind()).to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(object.kind().as_str().to_string()),
        );
    }
    Ok(value)
}

fn api_version(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::ServiceAccount => "v1",
        ObjectKind::Role
        | ObjectKind::ClusterRole
        | ObjectKind::RoleBinding
        | ObjectKind::ClusterRoleBinding => "rbac.authorization.k8s.io/v1",
        ObjectKind::Job => "batch/v1",
    }
}
