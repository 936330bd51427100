//! Test utilities for unit testing the chart controller
//!
//! This module provides helpers for creating test Charts and RBAC templates.

#[cfg(test)]
use crds::{Chart, ChartSpec, PolicyRuleTemplate, RbacTemplate, RoleTemplate};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Helper to create a test Chart CRD with an empty spec
#[cfg(test)]
pub fn test_chart(name: &str, namespace: &str) -> Chart {
    Chart {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some("0000-test-uid".to_string()),
            ..Default::default()
        },
        spec: ChartSpec {
            chart: "stable/traefik".to_string(),
            value_overrides: Default::default(),
            private_registry: None,
            rbac_template: None,
        },
        status: None,
    }
}

/// Helper to create an RBAC template with one pod-reader rule on each role
#[cfg(test)]
pub fn test_rbac_template() -> RbacTemplate {
    let rule = PolicyRuleTemplate {
        api_groups: vec![String::new()],
        resources: vec!["pods".to_string()],
        verbs: vec!["get".to_string(), "list".to_string()],
    };
    RbacTemplate {
        role: RoleTemplate {
            name: Some("template-role".to_string()),
            rules: vec![rule.clone()],
        },
        cluster_role: RoleTemplate {
            name: None,
            rules: vec![rule],
        },
    }
}
