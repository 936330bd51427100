//! Deterministic names for the objects generated for a Chart.
//!
//! Every child object's name is a pure function of the Chart name, so
//! regenerating the desired set for an unchanged Chart always lands on the
//! same identities. No counters, no generate-name.

/// Name of the service account the installer job runs as.
pub fn service_account_name(chart_name: &str) -> String {
    format!("{}-sa-install", chart_name)
}

/// Name of the Role generated in permissive mode.
pub fn role_name(chart_name: &str) -> String {
    format!("{}-role-install", chart_name)
}

/// Name of the ClusterRole generated in permissive mode.
pub fn cluster_role_name(chart_name: &str) -> String {
    format!("{}-clusterrole-install", chart_name)
}

/// Name of the RoleBinding tying the service account to the Role.
pub fn role_binding_name(chart_name: &str) -> String {
    format!("{}-rolebinding-install", chart_name)
}

/// Name of the ClusterRoleBinding tying the service account to the ClusterRole.
pub fn cluster_role_binding_name(chart_name: &str) -> String {
    format!("{}-clusterrolebinding-install", chart_name)
}

/// Name of the installer job.
pub fn job_name(chart_name: &str) -> String {
    format!("{}-job-install", chart_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_the_chart_name() {
        assert_eq!(service_account_name("traefik"), "traefik-sa-install");
        assert_eq!(role_name("traefik"), "traefik-role-install");
        assert_eq!(cluster_role_name("traefik"), "traefik-clusterrole-install");
        assert_eq!(role_binding_name("traefik"), "traefik-rolebinding-install");
        assert_eq!(
            cluster_role_binding_name("traefik"),
            "traefik-clusterrolebinding-install"
        );
        assert_eq!(job_name("traefik"), "traefik-job-install");
    }

    #[test]
    fn distinct_charts_never_collide() {
        let all = |chart: &str| {
            vec![
                service_account_name(chart),
                role_name(chart),
                cluster_role_name(chart),
                role_binding_name(chart),
                cluster_role_binding_name(chart),
                job_name(chart),
            ]
        };
        for a in all("coredns") {
            for b in all("traefik") {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn names_are_deterministic() {
        assert_eq!(job_name("metrics"), job_name("metrics"));
    }
}
