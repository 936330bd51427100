//! Desired-state generation.
//!
//! Pure function from a Chart spec and the controller mode to the full set of
//! child objects: service account, optional RBAC objects and the installer
//! job. Calling it twice with the same inputs yields byte-identical objects,
//! which is what makes reconciliation idempotent and pruning safe.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, ServiceAccount, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use thiserror::Error;

use crds::{Chart, ChartCondition, ChartStatus, PolicyRuleTemplate, CONDITION_GENERATED};

use crate::names;
use crate::objects::OwnedObject;

const VALUES_VOLUME_NAME: &str = "values";
const VALUES_MOUNT_PATH: &str = "/tmp/values";
const VALUES_FILE_PATH: &str = "/tmp/values/values.yaml";
const INSTALLER_CONTAINER_NAME: &str = "installer";

/// Controller-level settings, passed by parameter into generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Permissive mode: generate RBAC objects from the spec templates
    pub insecure: bool,
    /// Image the installer job runs
    pub installer_image: String,
}

/// Spec errors. All of these are non-retryable for the current spec
/// generation; only an edit to the Chart resolves them.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Chart metadata carries no name
    #[error("Chart has no name in metadata")]
    MissingName,

    /// Permissive mode was requested but the spec has no RBAC template
    #[error("permissive mode requires spec.rbacTemplate")]
    MissingRbacTemplate,

    /// Private registry credential with only one half configured
    #[error("private registry credential must set both key and value")]
    RegistryCredential,

    /// Generated object could not be serialized for hashing
    #[error("failed to serialize generated object: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Computes the desired object set for a Chart.
///
/// Returns the ordered set plus the status to write back, with the
/// `Generated` condition set. On error nothing is emitted; the caller never
/// sees a partial set.
pub fn generate(
    chart: &Chart,
    config: &GeneratorConfig,
    current_status: &ChartStatus,
) -> Result<(Vec<OwnedObject>, ChartStatus), GenerateError> {
    let name = chart
        .metadata
        .name
        .as_deref()
        .ok_or(GenerateError::MissingName)?;
    let namespace = chart.metadata.namespace.as_deref().unwrap_or("default");

    let mut objects: Vec<OwnedObject> = Vec::new();

    objects.push(OwnedObject::ServiceAccount(ServiceAccount {
        metadata: metadata(names::service_account_name(name), Some(namespace)),
        ..Default::default()
    }));

    if config.insecure {
        objects.extend(generate_rbac(chart, name, namespace)?);
    }

    let registry = chart.spec.private_registry.as_ref();
    let job = InstallJobBuilder::new()
        .chart_name(name)
        .namespace(namespace)
        .image(&config.installer_image)
        .service_account(names::service_account_name(name))
        .chart(&chart.spec.chart)
        .value_overrides(chart.spec.value_overrides.clone())
        .registry_key(registry.and_then(|r| r.key.clone()))
        .registry_value(registry.and_then(|r| r.value.clone()))
        .build()?;
    objects.push(OwnedObject::Job(job));

    for object in &mut objects {
        object.mark_owned_by(chart)?;
    }

    let mut status = current_status.clone();
    status.set_condition(ChartCondition::met(CONDITION_GENERATED));
    status.error = None;

    Ok((objects, status))
}

/// Role, ClusterRole and both bindings, built from the spec templates and
/// renamed to the Chart's deterministic names. Permissive mode only.
fn generate_rbac(
    chart: &Chart,
    name: &str,
    namespace: &str,
) -> Result<Vec<OwnedObject>, GenerateError> {
    let template = chart
        .spec
        .rbac_template
        .as_ref()
        .ok_or(GenerateError::MissingRbacTemplate)?;

    let role = Role {
        metadata: metadata(names::role_name(name), Some(namespace)),
        rules: Some(template.role.rules.iter().map(policy_rule).collect()),
    };

    let cluster_role = ClusterRole {
        metadata: metadata(names::cluster_role_name(name), None),
        rules: Some(template.cluster_role.rules.iter().map(policy_rule).collect()),
        ..Default::default()
    };

    let subject = Subject {
        kind: "ServiceAccount".to_string(),
        name: names::service_account_name(name),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };

    let role_binding = RoleBinding {
        metadata: metadata(names::role_binding_name(name), Some(namespace)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: names::role_name(name),
        },
        subjects: Some(vec![subject.clone()]),
    };

    let cluster_role_binding = ClusterRoleBinding {
        metadata: metadata(names::cluster_role_binding_name(name), None),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: names::cluster_role_name(name),
        },
        subjects: Some(vec![subject]),
    };

    Ok(vec![
        OwnedObject::Role(role),
        OwnedObject::ClusterRole(cluster_role),
        OwnedObject::RoleBinding(role_binding),
        OwnedObject::ClusterRoleBinding(cluster_role_binding),
    ])
}

fn policy_rule(template: &PolicyRuleTemplate) -> PolicyRule {
    PolicyRule {
        api_groups: Some(template.api_groups.clone()),
        resources: Some(template.resources.clone()),
        verbs: template.verbs.clone(),
        ..Default::default()
    }
}

fn metadata(name: String, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

/// Builds the one-shot installer job.
///
/// Every field is named; `build` validates that the registry credential is
/// either fully configured or fully absent before any object is constructed.
#[derive(Debug, Default)]
pub struct InstallJobBuilder {
    chart_name: String,
    namespace: String,
    image: String,
    service_account: String,
    chart: String,
    value_overrides: BTreeMap<String, String>,
    registry_key: Option<String>,
    registry_value: Option<String>,
}

impl InstallJobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chart_name(mut self, chart_name: &str) -> Self {
        self.chart_name = chart_name.to_string();
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn service_account(mut self, service_account: String) -> Self {
        self.service_account = service_account;
        self
    }

    pub fn chart(mut self, chart: &str) -> Self {
        self.chart = chart.to_string();
        self
    }

    pub fn value_overrides(mut self, value_overrides: BTreeMap<String, String>) -> Self {
        self.value_overrides = value_overrides;
        self
    }

    pub fn registry_key(mut self, registry_key: Option<String>) -> Self {
        self.registry_key = registry_key;
        self
    }

    pub fn registry_value(mut self, registry_value: Option<String>) -> Self {
        self.registry_value = registry_value;
        self
    }

    fn installer_args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            "--value".to_string(),
            VALUES_FILE_PATH.to_string(),
        ];
        for (key, value) in &self.value_overrides {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let (Some(key), Some(value)) = (&self.registry_key, &self.registry_value) {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        args
    }

    pub fn build(self) -> Result<Job, GenerateError> {
        if self.registry_key.is_some() != self.registry_value.is_some() {
            return Err(GenerateError::RegistryCredential);
        }

        let args = self.installer_args();
        Ok(Job {
            metadata: metadata(names::job_name(&self.chart_name), Some(&self.namespace)),
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        service_account_name: Some(self.service_account),
                        restart_policy: Some("OnFailure".to_string()),
                        containers: vec![Container {
                            name: INSTALLER_CONTAINER_NAME.to_string(),
                            image: Some(self.image),
                            args: Some(args),
                            env: Some(vec![
                                EnvVar {
                                    name: "NAME".to_string(),
                                    value: Some(self.chart_name),
                                    ..Default::default()
                                },
                                EnvVar {
                                    name: "CHART".to_string(),
                                    value: Some(self.chart),
                                    ..Default::default()
                                },
                            ]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: VALUES_VOLUME_NAME.to_string(),
                                mount_path: VALUES_MOUNT_PATH.to_string(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: VALUES_VOLUME_NAME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectKind;
    use crate::test_utils::{test_chart, test_rbac_template};
    use crds::PrivateRegistry;

    fn secure_config() -> GeneratorConfig {
        GeneratorConfig {
            insecure: false,
            installer_image: "example/helm-install:v1".to_string(),
        }
    }

    fn permissive_config() -> GeneratorConfig {
        GeneratorConfig {
            insecure: true,
            ..secure_config()
        }
    }

    fn job_args(objects: &[OwnedObject]) -> Vec<String> {
        let job = objects
            .iter()
            .find_map(|o| match o {
                OwnedObject::Job(job) => Some(job),
                _ => None,
            })
            .expect("no job generated");
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn secure_mode_emits_service_account_and_job_only() {
        let mut chart = test_chart("traefik", "kube-system");
        chart
            .spec
            .value_overrides
            .insert("replicas".to_string(), "3".to_string());

        let (objects, status) =
            generate(&chart, &secure_config(), &ChartStatus::default()).unwrap();

        let kinds: Vec<_> = objects.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec![ObjectKind::ServiceAccount, ObjectKind::Job]);
        assert_eq!(
            job_args(&objects),
            vec!["install", "--value", "/tmp/values/values.yaml", "--set", "replicas=3"]
        );
        assert_eq!(status.conditions[0].condition_type, CONDITION_GENERATED);
        assert_eq!(status.conditions[0].status, "True");
    }

    #[test]
    fn permissive_mode_emits_rbac_objects_with_cross_references() {
        let mut chart = test_chart("traefik", "kube-system");
        chart.spec.rbac_template = Some(test_rbac_template());

        let (objects, _) =
            generate(&chart, &permissive_config(), &ChartStatus::default()).unwrap();

        let kinds: Vec<_> = objects.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ServiceAccount,
                ObjectKind::Role,
                ObjectKind::ClusterRole,
                ObjectKind::RoleBinding,
                ObjectKind::ClusterRoleBinding,
                ObjectKind::Job,
            ]
        );

        let binding = objects
            .iter()
            .find_map(|o| match o {
                OwnedObject::RoleBinding(b) => Some(b),
                _ => None,
            })
            .unwrap();
        assert_eq!(binding.metadata.name.as_deref(), Some("traefik-rolebinding-install"));
        assert_eq!(binding.role_ref.name, "traefik-role-install");
        let subject = &binding.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "traefik-sa-install");
        assert_eq!(subject.namespace.as_deref(), Some("kube-system"));

        let cluster_binding = objects
            .iter()
            .find_map(|o| match o {
                OwnedObject::ClusterRoleBinding(b) => Some(b),
                _ => None,
            })
            .unwrap();
        assert_eq!(cluster_binding.role_ref.name, "traefik-clusterrole-install");
        assert!(cluster_binding.metadata.namespace.is_none());
    }

    #[test]
    fn permissive_mode_without_template_fails_without_partial_output() {
        let chart = test_chart("traefik", "kube-system");
        let result = generate(&chart, &permissive_config(), &ChartStatus::default());
        assert!(matches!(result, Err(GenerateError::MissingRbacTemplate)));
    }

    #[test]
    fn registry_credential_is_appended_after_overrides() {
        let mut chart = test_chart("traefik", "kube-system");
        chart
            .spec
            .value_overrides
            .insert("replicas".to_string(), "3".to_string());
        chart.spec.private_registry = Some(PrivateRegistry {
            key: Some("global.systemDefaultRegistry".to_string()),
            value: Some("registry.example.com".to_string()),
        });

        let (objects, _) = generate(&chart, &secure_config(), &ChartStatus::default()).unwrap();
        assert_eq!(
            job_args(&objects),
            vec![
                "install",
                "--value",
                "/tmp/values/values.yaml",
                "--set",
                "replicas=3",
                "--set",
                "global.systemDefaultRegistry=registry.example.com",
            ]
        );
    }

    #[test]
    fn half_configured_registry_credential_is_a_spec_error() {
        let mut chart = test_chart("traefik", "kube-system");
        chart.spec.private_registry = Some(PrivateRegistry {
            key: Some("global.systemDefaultRegistry".to_string()),
            value: None,
        });

        let result = generate(&chart, &secure_config(), &ChartStatus::default());
        assert!(matches!(result, Err(GenerateError::RegistryCredential)));
    }

    #[test]
    fn empty_registry_credential_is_ignored() {
        let mut chart = test_chart("traefik", "kube-system");
        chart.spec.private_registry = Some(PrivateRegistry { key: None, value: None });

        let (objects, _) = generate(&chart, &secure_config(), &ChartStatus::default()).unwrap();
        assert_eq!(
            job_args(&objects),
            vec!["install", "--value", "/tmp/values/values.yaml"]
        );
    }

    #[test]
    fn generation_is_idempotent() {
        let mut chart = test_chart("traefik", "kube-system");
        chart
            .spec
            .value_overrides
            .insert("replicas".to_string(), "3".to_string());
        chart.spec.rbac_template = Some(test_rbac_template());

        let (first, _) = generate(&chart, &permissive_config(), &ChartStatus::default()).unwrap();
        let (second, _) = generate(&chart, &permissive_config(), &ChartStatus::default()).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.key(), b.key());
            assert_eq!(a.spec_hash(), b.spec_hash());
            assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        }
    }

    #[test]
    fn every_generated_object_is_marked_owned() {
        let mut chart = test_chart("traefik", "kube-system");
        chart.spec.rbac_template = Some(test_rbac_template());

        let (objects, _) =
            generate(&chart, &permissive_config(), &ChartStatus::default()).unwrap();
        for object in &objects {
            assert!(object.is_owned_by("traefik", "kube-system"), "{}", object.key());
            assert!(object.spec_hash().is_some());
        }
    }

    #[test]
    fn job_runs_as_the_generated_service_account() {
        let chart = test_chart("traefik", "kube-system");
        let (objects, _) = generate(&chart, &secure_config(), &ChartStatus::default()).unwrap();
        let job = objects
            .iter()
            .find_map(|o| match o {
                OwnedObject::Job(job) => Some(job),
                _ => None,
            })
            .unwrap();
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("traefik-sa-install"));
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.volumes.as_ref().unwrap()[0].name, "values");
        assert!(pod.volumes.as_ref().unwrap()[0].empty_dir.is_some());
    }
}
