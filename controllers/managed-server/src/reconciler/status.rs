//! Status projection.
//!
//! Derives the ManagedServer status from the observed Deployment. Conditions only
//! change when their status or reason does, so reprojecting an unchanged world
//! yields an identical status and no write.

use crate::error::ControllerError;
use chrono::{DateTime, SubsecRound, Utc};
use crds::{ConditionStatus, ManagedServer, ManagedServerStatus, ServerCondition, ServerPhase};
use k8s_openapi::api::apps::v1::Deployment;

/// Condition tracking replica availability
pub const AVAILABLE: &str = "Available";
/// Condition tracking the outcome of the last reconcile pass
pub const RECONCILED: &str = "Reconciled";

/// When a partially ready workload counts as Running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePolicy {
    /// Percentage of desired replicas that must be ready (1..=100)
    pub ready_percent: u32,
}

impl Default for PhasePolicy {
    fn default() -> Self {
        Self { ready_percent: 100 }
    }
}

impl PhasePolicy {
    /// Ready replicas needed for Running, rounded up and never below one.
    pub fn running_threshold(&self, desired: i32) -> i32 {
        let desired = desired.max(0);
        let needed = (i64::from(desired) * i64::from(self.ready_percent) + 99) / 100;
        i32::try_from(needed).unwrap_or(desired).max(1)
    }
}

/// Ready replicas reported by the Deployment controller.
pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0)
}

/// Phase for a workload observed with `observed` against `desired` replicas.
///
/// `observed` is `None` when the workload is absent or was created in this pass.
pub fn derive_phase(observed: Option<&Deployment>, desired: i32, policy: PhasePolicy) -> ServerPhase {
    let Some(workload) = observed else {
        return ServerPhase::Pending;
    };
    if desired <= 0 {
        return ServerPhase::Unknown;
    }
    let ready = ready_replicas(workload);
    if ready > 0 && ready >= policy.running_threshold(desired) {
        ServerPhase::Running
    } else if ready > 0 {
        ServerPhase::Degraded
    } else if ready == 0 {
        ServerPhase::Pending
    } else {
        ServerPhase::Unknown
    }
}

/// Inserts or updates a condition by type.
///
/// The stored condition is replaced only when status or reason changed, and its
/// transition time only moves when status changed.
pub fn set_condition(conditions: &mut Vec<ServerCondition>, condition: ServerCondition) {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return;
    };
    if existing.status == condition.status && existing.reason == condition.reason {
        return;
    }
    let last_transition_time = if existing.status == condition.status {
        existing.last_transition_time
    } else {
        condition.last_transition_time
    };
    *existing = ServerCondition {
        last_transition_time,
        ..condition
    };
}

fn condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: String,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ServerCondition {
    ServerCondition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message,
        last_transition_time: now.trunc_subsecs(0),
        observed_generation: generation,
    }
}

fn available_condition(phase: ServerPhase, ready: i32, desired: i32) -> (ConditionStatus, &'static str, String) {
    let counts = format!("{ready}/{desired} replicas ready");
    match phase {
        ServerPhase::Running => (ConditionStatus::True, "MinimumReplicasAvailable", counts),
        ServerPhase::Degraded => (ConditionStatus::False, "PartiallyAvailable", counts),
        ServerPhase::Pending => (ConditionStatus::False, "ReplicasUnavailable", counts),
        ServerPhase::Unknown => (ConditionStatus::Unknown, "ReplicaCountUnknown", counts),
    }
}

/// Full status after a successful pass.
pub fn project(
    parent: &ManagedServer,
    observed: Option<&Deployment>,
    policy: PhasePolicy,
    now: DateTime<Utc>,
) -> ManagedServerStatus {
    let mut status = parent.status.clone().unwrap_or_default();
    let generation = parent.metadata.generation;
    let desired = parent.spec.replicas;
    let ready = observed.map_or(0, ready_replicas).max(0);
    let phase = derive_phase(observed, desired, policy);

    status.phase = Some(phase);
    status.available_replicas = ready;
    status.observed_generation = generation;

    let (available, reason, message) = available_condition(phase, ready, desired);
    set_condition(
        &mut status.conditions,
        condition(AVAILABLE, available, reason, message, generation, now),
    );
    set_condition(
        &mut status.conditions,
        condition(
            RECONCILED,
            ConditionStatus::True,
            "Converged",
            "Deployment and Service match the spec".to_string(),
            generation,
            now,
        ),
    );
    status
}

/// Stored status with `Reconciled` set False for `error`; everything else kept.
pub fn project_failure(parent: &ManagedServer, error: &ControllerError, now: DateTime<Utc>) -> ManagedServerStatus {
    let mut status = parent.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        condition(
            RECONCILED,
            ConditionStatus::False,
            error.reason(),
            error.to_string(),
            parent.metadata.generation,
            now,
        ),
    );
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_server, deployment_with_ready};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn phase(ready: i32, desired: i32) -> ServerPhase {
        derive_phase(Some(&deployment_with_ready(ready)), desired, PhasePolicy::default())
    }

    #[test]
    fn test_derive_phase_table() {
        assert_eq!(derive_phase(None, 2, PhasePolicy::default()), ServerPhase::Pending);
        assert_eq!(phase(0, 2), ServerPhase::Pending);
        assert_eq!(phase(1, 2), ServerPhase::Degraded);
        assert_eq!(phase(2, 2), ServerPhase::Running);
        assert_eq!(phase(3, 2), ServerPhase::Running);
        assert_eq!(phase(1, 0), ServerPhase::Unknown);
        assert_eq!(phase(-1, 2), ServerPhase::Unknown);
    }

    #[test]
    fn test_ready_percent_threshold() {
        let half = PhasePolicy { ready_percent: 50 };
        assert_eq!(half.running_threshold(4), 2);
        assert_eq!(half.running_threshold(3), 2);
        assert_eq!(half.running_threshold(1), 1);
        let workload = deployment_with_ready(2);
        assert_eq!(derive_phase(Some(&workload), 4, half), ServerPhase::Running);
        assert_eq!(derive_phase(Some(&workload), 5, half), ServerPhase::Degraded);
    }

    #[test]
    fn test_set_condition_transition_rules() {
        let mut conditions = Vec::new();
        let later = t0() + Duration::seconds(30);
        set_condition(
            &mut conditions,
            condition(AVAILABLE, ConditionStatus::False, "ReplicasUnavailable", "0/2".to_string(), Some(1), t0()),
        );

        // Message-only change is not written
        set_condition(
            &mut conditions,
            condition(AVAILABLE, ConditionStatus::False, "ReplicasUnavailable", "1/2".to_string(), Some(1), later),
        );
        assert_eq!(conditions[0].message, "0/2");

        // Reason change without status change keeps the transition time
        set_condition(
            &mut conditions,
            condition(AVAILABLE, ConditionStatus::False, "PartiallyAvailable", "1/2".to_string(), Some(1), later),
        );
        assert_eq!(conditions[0].reason, "PartiallyAvailable");
        assert_eq!(conditions[0].last_transition_time, t0());

        // Status change moves it
        set_condition(
            &mut conditions,
            condition(AVAILABLE, ConditionStatus::True, "MinimumReplicasAvailable", "2/2".to_string(), Some(1), later),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, later);
    }

    #[test]
    fn test_project_is_stable() {
        let mut parent = create_test_server("web", "default", "a:v1");
        parent.spec.replicas = 2;
        let workload = deployment_with_ready(2);

        let first = project(&parent, Some(&workload), PhasePolicy::default(), t0());
        assert_eq!(first.phase, Some(ServerPhase::Running));
        assert_eq!(first.available_replicas, 2);
        assert_eq!(first.observed_generation, Some(1));
        assert_eq!(first.condition(AVAILABLE).unwrap().status, ConditionStatus::True);
        assert_eq!(first.condition(RECONCILED).unwrap().reason, "Converged");

        parent.status = Some(first.clone());
        let second = project(&parent, Some(&workload), PhasePolicy::default(), t0() + Duration::minutes(5));
        assert_eq!(first, second);
    }

    #[test]
    fn test_transition_time_moves_only_on_flips() {
        let mut parent = create_test_server("web", "default", "a:v1");
        parent.spec.replicas = 2;
        parent.status = Some(project(&parent, None, PhasePolicy::default(), t0()));

        // (ready, Available status, minutes at which it last flipped)
        let steps = [
            (0, ConditionStatus::False, 0),
            (2, ConditionStatus::True, 2),
            (1, ConditionStatus::False, 3),
            (2, ConditionStatus::True, 4),
        ];
        for (minute, (ready, expected, flipped_at)) in (1..).zip(steps) {
            let now = t0() + Duration::minutes(minute);
            let status = project(&parent, Some(&deployment_with_ready(ready)), PhasePolicy::default(), now);

            let available = status.condition(AVAILABLE).unwrap();
            assert_eq!(available.status, expected, "ready={ready}");
            assert_eq!(available.last_transition_time, t0() + Duration::minutes(flipped_at), "ready={ready}");
            assert_eq!(status.condition(RECONCILED).unwrap().last_transition_time, t0());
            parent.status = Some(status);
        }
    }

    #[test]
    fn test_pending_reason_same_whether_or_not_observed() {
        let parent = create_test_server("web", "default", "a:v1");
        let created = project(&parent, None, PhasePolicy::default(), t0());
        let observed = project(&parent, Some(&deployment_with_ready(0)), PhasePolicy::default(), t0());
        assert_eq!(created, observed);
    }

    #[test]
    fn test_project_failure_keeps_phase() {
        let mut parent = create_test_server("web", "default", "a:v1");
        parent.status = Some(project(&parent, Some(&deployment_with_ready(1)), PhasePolicy::default(), t0()));
        let err = ControllerError::OwnershipCollision {
            kind: "Service".to_string(),
            name: "web".to_string(),
            owner_uid: "other".to_string(),
        };

        let failed = project_failure(&parent, &err, t0() + Duration::seconds(10));
        assert_eq!(failed.phase, Some(ServerPhase::Running));
        let reconciled = failed.condition(RECONCILED).unwrap();
        assert_eq!(reconciled.status, ConditionStatus::False);
        assert_eq!(reconciled.reason, "OwnershipCollision");
        assert_eq!(reconciled.last_transition_time, t0() + Duration::seconds(10));
    }
}
