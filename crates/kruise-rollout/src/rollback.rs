//! Rollback Planner.
//!
//! Restores a Deployment's pod template from the ReplicaSet whose
//! `pod-template-hash` equals the rollout's recorded stable revision. The
//! planner never guesses: a missing stable revision or a missing matching
//! ReplicaSet is an error. The rollout's own status is left untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use kruise_core::ownership::document_owned_by;
use kruise_core::registry::{self, WorkloadType};
use kruise_core::{DashError, DashResult, Document, OwnerKey, RolloutView};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::revisions::POD_TEMPLATE_HASH;

pub const ROLLED_BACK_AT: &str = "kruise-dashboard.io/rolled-back-at";

/// What a rollback will act on, read from the rollout.
#[derive(Debug, Clone)]
pub struct RollbackTarget {
    pub workload: &'static WorkloadType,
    pub name: String,
    pub stable_revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub message: String,
    pub rollout: String,
    pub namespace: String,
    pub workload_kind: String,
    pub workload_name: String,
    pub stable_revision: String,
}

fn unsupported(message: String) -> DashError {
    DashError::Unsupported {
        code: "UNSUPPORTED_ROLLBACK_KIND",
        message,
    }
}

/// Validate the rollout: a complete workloadRef to a kind that revisions
/// through ReplicaSets, and a recorded stable revision.
pub fn rollback_target(rollout: &Document) -> DashResult<RollbackTarget> {
    let view = RolloutView::new(rollout);
    let workload_ref = view
        .workload_ref()
        .ok_or_else(|| unsupported("rollback requires a complete workloadRef".into()))?;
    let workload = registry::resolve(&workload_ref.kind)
        .ok()
        .filter(|t| t.supports_rollback())
        .ok_or_else(|| {
            unsupported(format!(
                "rollback only supports Deployment workloads, got {}",
                workload_ref.kind
            ))
        })?;
    let stable_revision = view
        .stable_revision()
        .ok_or_else(|| DashError::PreconditionFailed {
            code: "STABLE_REVISION_NOT_FOUND",
            message: "no stable revision to roll back to".into(),
        })?;

    Ok(RollbackTarget {
        workload,
        name: workload_ref.name,
        stable_revision: stable_revision.to_string(),
    })
}

/// The ReplicaSet owned by `workload` whose hash is `stable_revision`.
pub fn find_stable_replica_set<'a>(
    workload: &Document,
    workload_kind: &str,
    replica_sets: &'a [Document],
    stable_revision: &str,
) -> DashResult<&'a Document> {
    let parent = OwnerKey::of(workload_kind, workload);
    let mut matches = replica_sets.iter().filter(|rs| {
        document_owned_by(rs, parent) && rs.label(POD_TEMPLATE_HASH) == Some(stable_revision)
    });

    let found = matches.next().ok_or_else(|| DashError::NotFound {
        code: "STABLE_REPLICASET_NOT_FOUND",
        message: format!(
            "no ReplicaSet owned by {} has pod-template-hash {stable_revision}",
            parent.name
        ),
    })?;
    if matches.next().is_some() {
        warn!(
            workload = parent.name,
            stable_revision, "several ReplicaSets share the stable hash; using the first"
        );
    }
    Ok(found)
}

/// The live workload with the stable pod template and a rollback stamp.
pub fn apply_stable_template(
    workload: &Document,
    stable_replica_set: &Document,
    now: DateTime<Utc>,
) -> DashResult<Document> {
    let template = stable_replica_set
        .get_map("spec.template")
        .filter(|template| !template.is_empty())
        .ok_or_else(|| DashError::PreconditionFailed {
            code: "INVALID_STABLE_TEMPLATE",
            message: "stable ReplicaSet template is empty".into(),
        })?;

    let mut updated = workload.clone();
    updated.set("spec.template", Value::Object(template.clone()))?;
    updated.set_annotation(ROLLED_BACK_AT, &timestamp(now))?;
    Ok(updated)
}

/// RFC 3339 with nanoseconds, UTC.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn rollout(kind: &str, stable: Option<&str>) -> Document {
        let mut value = json!({
            "metadata": {"name": "r1", "namespace": "ns1"},
            "spec": {"workloadRef": {"apiVersion": "apps/v1", "kind": kind, "name": "d1"}}
        });
        if let Some(stable) = stable {
            value["status"] = json!({"canaryStatus": {"stableRevision": stable}});
        }
        doc(value)
    }

    fn deployment() -> Document {
        doc(json!({
            "metadata": {"name": "d1", "uid": "d1-uid", "annotations": {"owner": "team-a"}},
            "spec": {"template": {"spec": {"containers": [{"name": "app", "image": "app:v2"}]}}}
        }))
    }

    fn replica_set(name: &str, hash: &str, image: &str) -> Document {
        doc(json!({
            "metadata": {
                "name": name,
                "labels": {"pod-template-hash": hash},
                "ownerReferences": [{"kind": "Deployment", "name": "d1", "uid": "d1-uid"}]
            },
            "spec": {"template": {
                "metadata": {"labels": {"pod-template-hash": hash}},
                "spec": {"containers": [{"name": "app", "image": image}]}
            }}
        }))
    }

    #[test]
    fn target_requires_a_deployment_ref() {
        let target = rollback_target(&rollout("Deployment", Some("abc123"))).unwrap();
        assert_eq!(target.workload.key, "deployment");
        assert_eq!(target.name, "d1");
        assert_eq!(target.stable_revision, "abc123");

        let err = rollback_target(&rollout("CloneSet", Some("abc123"))).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ROLLBACK_KIND");
        let err = rollback_target(&rollout("Widget", Some("abc123"))).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ROLLBACK_KIND");
    }

    #[test]
    fn missing_stable_revision_is_a_precondition_failure() {
        let err = rollback_target(&rollout("Deployment", None)).unwrap_err();
        assert_eq!(err.code(), "STABLE_REVISION_NOT_FOUND");
        assert!(matches!(err, DashError::PreconditionFailed { .. }));
    }

    #[test]
    fn selects_only_the_stable_hash() {
        let replica_sets = [
            replica_set("d1-def456", "def456", "app:v2"),
            replica_set("d1-abc123", "abc123", "app:v1"),
        ];
        let found = find_stable_replica_set(&deployment(), "Deployment", &replica_sets, "abc123").unwrap();
        assert_eq!(found.name(), Some("d1-abc123"));

        let updated = apply_stable_template(&deployment(), found, Utc::now()).unwrap();
        let containers = updated.get_list("spec.template.spec.containers").unwrap();
        assert_eq!(containers[0]["image"], "app:v1");
        assert!(updated.annotation(ROLLED_BACK_AT).is_some());
        assert_eq!(updated.annotation("owner"), Some("team-a"));
    }

    #[test]
    fn no_matching_replica_set_is_not_found() {
        let replica_sets = [replica_set("d1-def456", "def456", "app:v2")];
        let err = find_stable_replica_set(&deployment(), "Deployment", &replica_sets, "abc123").unwrap_err();
        assert_eq!(err.code(), "STABLE_REPLICASET_NOT_FOUND");
        assert!(matches!(err, DashError::NotFound { .. }));
    }

    #[test]
    fn replica_sets_of_other_workloads_are_ignored() {
        let mut foreign = replica_set("other-abc123", "abc123", "app:x");
        foreign
            .set("metadata.ownerReferences", json!([{"kind": "Deployment", "name": "other"}]))
            .unwrap();
        let err = find_stable_replica_set(&deployment(), "Deployment", &[foreign], "abc123").unwrap_err();
        assert_eq!(err.code(), "STABLE_REPLICASET_NOT_FOUND");
    }

    #[test]
    fn empty_template_is_rejected() {
        let rs = doc(json!({"metadata": {"name": "d1-abc123"}, "spec": {"template": {}}}));
        let err = apply_stable_template(&deployment(), &rs, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STABLE_TEMPLATE");
    }

    #[test]
    fn timestamps_carry_nanoseconds_in_utc() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp(now), "2024-05-01T10:00:00.123456789Z");
    }
}
