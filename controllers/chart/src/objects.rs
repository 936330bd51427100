//! Generated child objects and their identities.
//!
//! Everything the controller creates for a Chart is wrapped in [`OwnedObject`]
//! so the apply engine can treat the six kinds uniformly. Ownership is marked
//! with a label pair plus an owner reference on namespaced kinds; a spec-hash
//! annotation records what the controller last wrote and drives divergence
//! detection.

use std::fmt;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

use crds::Chart;

/// Label naming the Chart an object belongs to.
pub const OWNED_BY_LABEL: &str = "chartops.microscaler.io/owned-by";

/// Label naming the namespace of the owning Chart.
///
/// ClusterRole and ClusterRoleBinding have no namespace of their own, so the
/// owning Chart cannot be recovered from an owner reference. The label pair
/// is the single source of truth for pruning.
pub const OWNER_NAMESPACE_LABEL: &str = "chartops.microscaler.io/owner-namespace";

/// Annotation holding the hash of the object as the controller last wrote it.
pub const SPEC_HASH_ANNOTATION: &str = "chartops.microscaler.io/spec-hash";

/// The kinds of objects the controller generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    Job,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Role => "Role",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::Job => "Job",
        }
    }

    /// ClusterRole and ClusterRoleBinding live outside any namespace.
    pub fn is_cluster_scoped(self) -> bool {
        matches!(self, ObjectKind::ClusterRole | ObjectKind::ClusterRoleBinding)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a generated object: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A child object generated for a Chart.
#[derive(Debug, Clone)]
pub enum OwnedObject {
    ServiceAccount(ServiceAccount),
    Role(Role),
    ClusterRole(ClusterRole),
    RoleBinding(RoleBinding),
    ClusterRoleBinding(ClusterRoleBinding),
    Job(Job),
}

impl OwnedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            OwnedObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            OwnedObject::Role(_) => ObjectKind::Role,
            OwnedObject::ClusterRole(_) => ObjectKind::ClusterRole,
            OwnedObject::RoleBinding(_) => ObjectKind::RoleBinding,
            OwnedObject::ClusterRoleBinding(_) => ObjectKind::ClusterRoleBinding,
            OwnedObject::Job(_) => ObjectKind::Job,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            OwnedObject::ServiceAccount(o) => &o.metadata,
            OwnedObject::Role(o) => &o.metadata,
            OwnedObject::ClusterRole(o) => &o.metadata,
            OwnedObject::RoleBinding(o) => &o.metadata,
            OwnedObject::ClusterRoleBinding(o) => &o.metadata,
            OwnedObject::Job(o) => &o.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            OwnedObject::ServiceAccount(o) => &mut o.metadata,
            OwnedObject::Role(o) => &mut o.metadata,
            OwnedObject::ClusterRole(o) => &mut o.metadata,
            OwnedObject::RoleBinding(o) => &mut o.metadata,
            OwnedObject::ClusterRoleBinding(o) => &mut o.metadata,
            OwnedObject::Job(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            namespace: self.metadata().namespace.clone(),
            name: self.name().to_string(),
        }
    }

    /// The spec hash recorded on the object, if any.
    pub fn spec_hash(&self) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
            .map(String::as_str)
    }

    /// Whether the object carries the ownership labels of the given Chart.
    pub fn is_owned_by(&self, chart_name: &str, chart_namespace: &str) -> bool {
        let labels = match self.metadata().labels.as_ref() {
            Some(labels) => labels,
            None => return false,
        };
        labels.get(OWNED_BY_LABEL).map(String::as_str) == Some(chart_name)
            && labels.get(OWNER_NAMESPACE_LABEL).map(String::as_str) == Some(chart_namespace)
    }

    /// Serializes the wrapped object (not the enum wrapper).
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            OwnedObject::ServiceAccount(o) => serde_json::to_value(o),
            OwnedObject::Role(o) => serde_json::to_value(o),
            OwnedObject::ClusterRole(o) => serde_json::to_value(o),
            OwnedObject::RoleBinding(o) => serde_json::to_value(o),
            OwnedObject::ClusterRoleBinding(o) => serde_json::to_value(o),
            OwnedObject::Job(o) => serde_json::to_value(o),
        }
    }

    /// Stamps ownership onto the object and records its spec hash.
    ///
    /// The hash is computed over the object with labels applied but before
    /// the hash annotation itself is inserted, so re-stamping an unchanged
    /// object always reproduces the same hash.
    pub fn mark_owned_by(&mut self, chart: &Chart) -> Result<(), serde_json::Error> {
        let chart_name = chart.metadata.name.clone().unwrap_or_default();
        let chart_namespace = chart
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let cluster_scoped = self.kind().is_cluster_scoped();
        let meta = self.metadata_mut();
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(OWNED_BY_LABEL.to_string(), chart_name.clone());
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(OWNER_NAMESPACE_LABEL.to_string(), chart_namespace.clone());
        if let Some(annotations) = meta.annotations.as_mut() {
            annotations.remove(SPEC_HASH_ANNOTATION);
        }

        // Cluster-scoped objects cannot reference a namespaced owner; they
        // are pruned via the label pair instead.
        if !cluster_scoped {
            meta.owner_references = Some(vec![OwnerReference {
                api_version: "chartops.microscaler.io/v1alpha1".to_string(),
                kind: "Chart".to_string(),
                name: chart_name,
                uid: chart.metadata.uid.clone().unwrap_or_default(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]);
        }

        let hash = format!("{:x}", md5::compute(serde_json::to_vec(&self.to_json()?)?));
        self.metadata_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(SPEC_HASH_ANNOTATION.to_string(), hash);
        Ok(())
    }
}

impl From<ServiceAccount> for OwnedObject {
    fn from(o: ServiceAccount) -> Self {
        OwnedObject::ServiceAccount(o)
    }
}

impl From<Role> for OwnedObject {
    fn from(o: Role) -> Self {
        OwnedObject::Role(o)
    }
}

impl From<ClusterRole> for OwnedObject {
    fn from(o: ClusterRole) -> Self {
        OwnedObject::ClusterRole(o)
    }
}

impl From<RoleBinding> for OwnedObject {
    fn from(o: RoleBinding) -> Self {
        OwnedObject::RoleBinding(o)
    }
}

impl From<ClusterRoleBinding> for OwnedObject {
    fn from(o: ClusterRoleBinding) -> Self {
        OwnedObject::ClusterRoleBinding(o)
    }
}

impl From<Job> for OwnedObject {
    fn from(o: Job) -> Self {
        OwnedObject::Job(o)
    }
}
