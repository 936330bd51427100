//! Leader election gate.
//!
//! Exactly one controller instance runs the reconciliation loop. The gate
//! sits in front of the watcher: it takes a coordination Lease and keeps it
//! renewed, and a second instance blocks until the lease expires. The
//! acquisition decision itself is a pure function of the lease contents, the
//! candidate identity and the clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::error::ControllerError;

/// How long a held lease stays valid without renewal.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);

/// Whether `identity` may take the lease at `now`.
///
/// True when the lease does not exist, has no holder, is already held by this
/// identity, or has not been renewed within the ttl.
pub fn may_acquire(
    lease: Option<&Lease>,
    identity: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> bool {
    let spec = match lease.and_then(|l| l.spec.as_ref()) {
        Some(spec) => spec,
        None => return true,
    };
    let holder = match spec.holder_identity.as_deref() {
        Some(holder) => holder,
        None => return true,
    };
    if holder == identity {
        return true;
    }
    let renewed = match &spec.renew_time {
        Some(MicroTime(at)) => *at,
        None => return true,
    };
    let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(15));
    renewed + ttl < now
}

/// Takes and holds the controller lease.
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    ttl: Duration,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Blocks until this instance holds the lease.
    pub async fn acquire(&self) -> Result<(), ControllerError> {
        loop {
            if self.try_acquire().await? {
                info!("Acquired leadership lease as {}", self.identity);
                return Ok(());
            }
            debug!("Leadership lease held elsewhere, waiting");
            tokio::time::sleep(self.ttl / 3).await;
        }
    }

    /// Renews the held lease until it is lost. Returns when another instance
    /// has taken over, at which point this instance must stop reconciling.
    pub async fn keep_renewing(self: Arc<Self>) -> Result<(), ControllerError> {
        let interval = self.ttl / 3;
        loop {
            tokio::time::sleep(interval).await;
            match self.try_acquire().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Lost the leadership lease; another instance is active");
                    return Err(ControllerError::Watch(
                        "leadership lease lost".to_string(),
                    ));
                }
                Err(e) => {
                    // Transient renewal failure: the lease stays valid for a
                    // full ttl, so retry on the next tick.
                    warn!("Failed to renew leadership lease: {}", e);
                }
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool, ControllerError> {
        let current = self.api.get_opt(&self.lease_name).await?;
        let now = Utc::now();
        if !may_acquire(current.as_ref(), &self.identity, now, self.ttl) {
            return Ok(false);
        }

        let lease = self.desired_lease(current.as_ref(), now);
        match current {
            None => match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                // Another candidate created it first
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            },
            Some(_) => {
                match self
                    .api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    // Optimistic-concurrency conflict: another candidate won
                    Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn desired_lease(&self, current: Option<&Lease>, now: DateTime<Utc>) -> Lease {
        let current_spec = current.and_then(|l| l.spec.as_ref());
        let already_ours = current_spec
            .and_then(|s| s.holder_identity.as_deref())
            .map(|holder| holder == self.identity)
            .unwrap_or(false);
        let acquire_time = if already_ours {
            current_spec
                .and_then(|s| s.acquire_time.clone())
                .unwrap_or(MicroTime(now))
        } else {
            MicroTime(now)
        };

        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                resource_version: current.and_then(|l| l.metadata.resource_version.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.ttl.as_secs() as i32),
                acquire_time: Some(acquire_time),
                renew_time: Some(MicroTime(now)),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed_secs_ago: Option<i64>) -> Lease {
        let now = Utc::now();
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(15),
                acquire_time: None,
                renew_time: renewed_secs_ago
                    .map(|secs| MicroTime(now - ChronoDuration::seconds(secs))),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn missing_lease_may_be_acquired() {
        assert!(may_acquire(None, "a", Utc::now(), DEFAULT_LEASE_TTL));
    }

    #[test]
    fn lease_without_holder_may_be_acquired() {
        let lease = lease(None, Some(0));
        assert!(may_acquire(Some(&lease), "a", Utc::now(), DEFAULT_LEASE_TTL));
    }

    #[test]
    fn fresh_lease_held_elsewhere_may_not_be_acquired() {
        let lease = lease(Some("b"), Some(1));
        assert!(!may_acquire(Some(&lease), "a", Utc::now(), DEFAULT_LEASE_TTL));
    }

    #[test]
    fn expired_lease_may_be_taken_over() {
        let lease = lease(Some("b"), Some(60));
        assert!(may_acquire(Some(&lease), "a", Utc::now(), DEFAULT_LEASE_TTL));
    }

    #[test]
    fn own_lease_may_always_be_renewed() {
        let lease = lease(Some("a"), Some(1));
        assert!(may_acquire(Some(&lease), "a", Utc::now(), DEFAULT_LEASE_TTL));
    }
}
