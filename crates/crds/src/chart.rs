//! Chart CRD
//!
//! Describes a packaged application to install into the cluster. The chart
//! controller reacts to these resources and drives an installer job; it never
//! creates Charts itself.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition recorded once the desired object set has been generated.
pub const CONDITION_GENERATED: &str = "Generated";

/// Condition recorded once the installer job and its supporting objects have
/// been applied to the cluster.
pub const CONDITION_JOB_DEPLOYED: &str = "JobDeployed";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chartops.microscaler.io",
    version = "v1alpha1",
    kind = "Chart",
    namespaced,
    status = "ChartStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Base chart reference handed to the installer
    pub chart: String,

    /// Value overrides, each passed to the installer as `--set key=value`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_overrides: BTreeMap<String, String>,

    /// Private registry credential; key and value are only used together
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_registry: Option<PrivateRegistry>,

    /// Role templates used when the controller runs in permissive mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac_template: Option<RbacTemplate>,
}

/// Extra `--set` pair injected into the installer arguments when both halves
/// are configured.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRegistry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Access-control templates copied into generated Role/ClusterRole objects.
///
/// Template names are ignored; the controller derives deterministic names
/// from the Chart name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacTemplate {
    pub role: RoleTemplate,
    pub cluster_role: RoleTemplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleTemplate {
    /// Template name, replaced by the controller's derived name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<PolicyRuleTemplate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRuleTemplate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    /// Reconciliation phase for this Chart
    #[serde(default)]
    pub phase: ChartPhase,

    /// Named conditions consumed by external observers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ChartCondition>,

    /// Error message from the last failed pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChartStatus {
    /// Replaces the condition with the same type, or appends it.
    pub fn set_condition(&mut self, condition: ChartCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }
}

/// Per-Chart reconciliation state machine.
///
/// `Pending -> Generating -> Applying -> Settled`, with `Applying -> Pending`
/// on a retryable failure and `Generating -> Failed` on a malformed spec.
/// `Failed` is terminal only for the current spec; an edit re-enters
/// `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ChartPhase {
    #[default]
    Pending,
    Generating,
    Applying,
    Settled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartCondition {
    /// Condition name, e.g. "JobDeployed"
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True" or "False"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChartCondition {
    /// A condition that holds.
    pub fn met(condition_type: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: "True".to_string(),
            message: None,
        }
    }

    /// A condition that does not hold, with the reason it failed.
    pub fn unmet(condition_type: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: "False".to_string(),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_spec_deserializes_camel_case() {
        let yaml = r#"
chart: stable/traefik
valueOverrides:
  replicas: "3"
privateRegistry:
  key: global.systemDefaultRegistry
  value: registry.example.com
rbacTemplate:
  role:
    rules:
    - apiGroups: [""]
      resources: ["pods"]
      verbs: ["get", "list"]
  clusterRole:
    rules: []
"#;
        let spec: ChartSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.chart, "stable/traefik");
        assert_eq!(spec.value_overrides.get("replicas"), Some(&"3".to_string()));
        let registry = spec.private_registry.unwrap();
        assert_eq!(registry.key.as_deref(), Some("global.systemDefaultRegistry"));
        let template = spec.rbac_template.unwrap();
        assert_eq!(template.role.rules.len(), 1);
        assert_eq!(template.role.rules[0].verbs, vec!["get", "list"]);
    }

    #[test]
    fn status_defaults_to_pending() {
        let status = ChartStatus::default();
        assert_eq!(status.phase, ChartPhase::Pending);
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn set_condition_replaces_same_type() {
        let mut status = ChartStatus::default();
        status.set_condition(ChartCondition::unmet(CONDITION_GENERATED, "bad spec"));
        status.set_condition(ChartCondition::met(CONDITION_GENERATED));
        status.set_condition(ChartCondition::met(CONDITION_JOB_DEPLOYED));

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[0].message, None);
    }

    #[test]
    fn phase_serializes_as_pascal_case() {
        let json = serde_json::to_string(&ChartPhase::Settled).unwrap();
        assert_eq!(json, "\"Settled\"");
    }
}
