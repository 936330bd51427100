//! Per-kind patch policy.
//!
//! Jobs are immutable once created, so any divergence forces a
//! delete-then-recreate. Everything else can be patched in place. The table
//! is the policy; adding another immutable kind is a one-line change and the
//! apply engine never has to know.

use crate::objects::ObjectKind;

/// How a divergence between desired and live is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    UpdateInPlace,
    DeleteThenRecreate,
}

/// Kinds whose specs the platform refuses to mutate after creation.
const IMMUTABLE_KINDS: &[ObjectKind] = &[ObjectKind::Job];

/// The strategy to use when a desired object differs from its live
/// counterpart.
pub fn strategy_for(kind: ObjectKind) -> PatchStrategy {
    if IMMUTABLE_KINDS.contains(&kind) {
        PatchStrategy::DeleteThenRecreate
    } else {
        PatchStrategy::UpdateInPlace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_are_replaced_never_patched() {
        assert_eq!(strategy_for(ObjectKind::Job), PatchStrategy::DeleteThenRecreate);
    }

    #[test]
    fn mutable_kinds_are_patched_in_place() {
        for kind in [
            ObjectKind::ServiceAccount,
            ObjectKind::Role,
            ObjectKind::ClusterRole,
            ObjectKind::RoleBinding,
            ObjectKind::ClusterRoleBinding,
        ] {
            assert_eq!(strategy_for(kind), PatchStrategy::UpdateInPlace);
        }
    }
}
