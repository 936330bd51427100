//! Package index and descriptor types.
//!
//! Mirrors the wire format of the remote index and of each package's
//! `package.yaml` descriptor as stored in the local chart cache.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Remote index listing the available packages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub packages: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
}

/// Cached package descriptor (`package.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageYaml {
    /// CRD manifest text, applied/removed with kubectl
    #[serde(default)]
    pub crd_manifest: String,

    /// RBAC manifest text shipped alongside the chart
    #[serde(default)]
    pub rbac_manifest: String,

    /// URL of the gzipped chart bundle
    #[serde(default)]
    pub base: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub questions: Vec<Question>,

    /// Named override profiles; at most one is marked default
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,

    #[serde(default)]
    pub private_registry: PrivateRegistrySetting,

    #[serde(default)]
    pub patches: Vec<Patch>,

    /// Commands run before `helm delete`
    #[serde(default)]
    pub pre_delete_command: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub url: String,
    /// Path inside the extracted chart the patch applies to
    #[serde(default)]
    pub path: String,
    /// File name the patch is stored under in the cache
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub min_length: i64,
    #[serde(default)]
    pub max_length: i64,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub valid_chars: String,
    #[serde(default)]
    pub invalid_chars: String,
    #[serde(default)]
    pub subquestions: Vec<SubQuestion>,
    #[serde(default)]
    pub show_if: String,
    #[serde(default)]
    pub show_subquestion_if: String,
    #[serde(default)]
    pub satisfies: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuestion {
    #[serde(default)]
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub min_length: i64,
    #[serde(default)]
    pub max_length: i64,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub valid_chars: String,
    #[serde(default)]
    pub invalid_chars: String,
    #[serde(default)]
    pub show_if: String,
    #[serde(default)]
    pub satisfies: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub default: bool,
    #[serde(default, rename = "valueYaml")]
    pub value_yaml: String,
}

/// Registry override injected into the helm invocation when both halves are
/// configured.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrivateRegistrySetting {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub registry: String,
}

impl PrivateRegistrySetting {
    pub fn is_configured(&self) -> bool {
        !self.key.is_empty() && !self.registry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_deserializes() {
        let yaml = r#"
packages:
- name: traefik
  version: 1.77.1
  url: https://charts.example.com/traefik/package.yaml
- name: coredns
  version: 1.5.0
  url: file:///var/lib/charts/coredns/package.yaml
"#;
        let index: Index = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(index.packages.len(), 2);
        assert_eq!(index.packages[0].name, "traefik");
        assert!(index.packages[1].url.starts_with("file://"));
    }

    #[test]
    fn descriptor_deserializes_camel_case() {
        let yaml = r#"
crdManifest: |
  apiVersion: apiextensions.k8s.io/v1
rbacManifest: ""
base: https://charts.example.com/traefik-1.77.1.tgz
profiles:
  minimal:
    default: true
    valueYaml: |
      replicas: 1
  ha:
    valueYaml: |
      replicas: 3
privateRegistry:
  key: global.systemDefaultRegistry
  registry: registry.example.com
patches:
- url: https://charts.example.com/patches/0001.patch
  path: templates/deployment.yaml
  name: 0001.patch
preDeleteCommand:
- kubectl delete job -l app=traefik
questions:
- variable: replicas
  label: Replica count
  type: int
  minLength: 0
  subquestions:
  - variable: replicas.max
    showIf: replicas.enabled=true
"#;
        let descriptor: PackageYaml = serde_yaml::from_str(yaml).unwrap();
        assert!(descriptor.crd_manifest.contains("apiextensions"));
        assert_eq!(descriptor.profiles.len(), 2);
        assert!(descriptor.profiles["minimal"].default);
        assert!(!descriptor.profiles["ha"].default);
        assert!(descriptor.private_registry.is_configured());
        assert_eq!(descriptor.patches[0].name, "0001.patch");
        assert_eq!(descriptor.pre_delete_command.len(), 1);
        assert_eq!(descriptor.questions[0].question_type, "int");
        assert_eq!(
            descriptor.questions[0].subquestions[0].show_if,
            "replicas.enabled=true"
        );
    }

    #[test]
    fn registry_with_one_half_is_not_configured() {
        let registry = PrivateRegistrySetting {
            key: "global.systemDefaultRegistry".to_string(),
            registry: String::new(),
        };
        assert!(!registry.is_configured());
    }

    #[test]
    fn missing_fields_default() {
        let descriptor: PackageYaml = serde_yaml::from_str("base: x.tgz").unwrap();
        assert!(descriptor.profiles.is_empty());
        assert!(descriptor.pre_delete_command.is_empty());
        assert!(!descriptor.private_registry.is_configured());
    }
}
