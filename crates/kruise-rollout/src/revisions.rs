//! Revision Reconciler: which pods are stable, which are canary.
//!
//! Joins a workload, its ReplicaSets and its pods into revision cohorts.
//! Deployments revision through owned ReplicaSets; the OpenKruise kinds
//! label each pod with a `controller-revision-hash`. Every pass is computed
//! from fresh listings; nothing is cached.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use kruise_core::ownership::document_owned_by;
use kruise_core::{Document, OwnerKey};
use serde::Serialize;
use serde_json::Value;

pub const POD_TEMPLATE_HASH: &str = "pod-template-hash";
pub const CONTROLLER_REVISION_HASH: &str = "controller-revision-hash";
pub const DEPLOYMENT_REVISION: &str = "deployment.kubernetes.io/revision";

/// Cohort name for pods without a revision label.
pub const UNKNOWN_REVISION: &str = "unknown";

/// Whether a container entry came from `containers` or `initContainers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerKind {
    Container,
    InitContainer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    #[serde(rename = "type")]
    pub kind: ContainerKind,
}

/// A group of pods sharing one revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionCohort {
    /// ReplicaSet name, or the revision hash for label-revisioned kinds.
    pub name: String,
    /// Numeric revision ordinal when known, otherwise empty.
    pub revision: String,
    pub pod_template_hash: String,
    pub is_stable: bool,
    pub is_canary: bool,
    pub replicas: i64,
    pub ready_replicas: i64,
    pub pods: Vec<Document>,
    /// Only derivable when the cohort has an owning ReplicaSet.
    pub containers: Option<Vec<ContainerInfo>>,
}

/// The stable and canary revision hashes recorded on a rollout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionMarks<'a> {
    pub stable: Option<&'a str>,
    pub canary: Option<&'a str>,
}

impl RevisionMarks<'_> {
    fn tag(&self, hash: &str) -> (bool, bool) {
        if hash.is_empty() {
            return (false, false);
        }
        (self.stable == Some(hash), self.canary == Some(hash))
    }
}

/// Deployment path: one cohort per ReplicaSet owned by `workload`, holding
/// the pods that ReplicaSet owns. Pods of foreign ReplicaSets are dropped.
pub fn reconcile_replica_sets(
    workload: &Document,
    workload_kind: &str,
    replica_sets: &[Document],
    pods: &[Document],
    marks: RevisionMarks<'_>,
) -> Vec<RevisionCohort> {
    let parent = OwnerKey::of(workload_kind, workload);
    let owned: Vec<&Document> = replica_sets
        .iter()
        .filter(|rs| document_owned_by(rs, parent))
        .collect();

    let mut members: Vec<Vec<Document>> = vec![Vec::new(); owned.len()];
    for pod in pods {
        if let Some(slot) = owned
            .iter()
            .position(|rs| document_owned_by(pod, OwnerKey::of("ReplicaSet", rs)))
        {
            members[slot].push(pod.clone());
        }
    }

    let mut cohorts: Vec<RevisionCohort> = owned
        .into_iter()
        .zip(members)
        .map(|(rs, pods)| {
            let hash = rs.label(POD_TEMPLATE_HASH).unwrap_or_default();
            let (is_stable, is_canary) = marks.tag(hash);
            RevisionCohort {
                name: rs.name().unwrap_or_default().to_string(),
                revision: rs.annotation(DEPLOYMENT_REVISION).unwrap_or_default().to_string(),
                pod_template_hash: hash.to_string(),
                is_stable,
                is_canary,
                replicas: rs.get_i64("spec.replicas").unwrap_or(0),
                ready_replicas: rs.get_i64("status.readyReplicas").unwrap_or(0),
                pods,
                containers: Some(extract_containers(rs)),
            }
        })
        .collect();
    order_cohorts(&mut cohorts);
    cohorts
}

/// Label path: pods grouped by `controller-revision-hash`; unlabeled pods
/// share the `unknown` cohort. Readiness is counted per pod.
pub fn reconcile_pod_labels(pods: &[Document], marks: RevisionMarks<'_>) -> Vec<RevisionCohort> {
    let mut groups: BTreeMap<&str, Vec<&Document>> = BTreeMap::new();
    for pod in pods {
        let hash = pod
            .label(CONTROLLER_REVISION_HASH)
            .filter(|hash| !hash.is_empty())
            .unwrap_or(UNKNOWN_REVISION);
        groups.entry(hash).or_default().push(pod);
    }

    let mut cohorts: Vec<RevisionCohort> = groups
        .into_iter()
        .map(|(hash, members)| {
            let (is_stable, is_canary) = if hash == UNKNOWN_REVISION {
                (false, false)
            } else {
                marks.tag(hash)
            };
            RevisionCohort {
                name: hash.to_string(),
                revision: String::new(),
                pod_template_hash: hash.to_string(),
                is_stable,
                is_canary,
                replicas: members.len() as i64,
                ready_replicas: members.iter().filter(|pod| is_pod_ready(pod)).count() as i64,
                pods: members.into_iter().cloned().collect(),
                containers: None,
            }
        })
        .collect();
    order_cohorts(&mut cohorts);
    cohorts
}

/// Canary first, then stable, then numeric revision descending
/// (non-numeric sorts as -1), then revision string descending, then name.
pub fn order_cohorts(cohorts: &mut [RevisionCohort]) {
    cohorts.sort_by(compare_cohorts);
}

fn compare_cohorts(a: &RevisionCohort, b: &RevisionCohort) -> Ordering {
    b.is_canary
        .cmp(&a.is_canary)
        .then_with(|| b.is_stable.cmp(&a.is_stable))
        .then_with(|| revision_number(&b.revision).cmp(&revision_number(&a.revision)))
        .then_with(|| b.revision.cmp(&a.revision))
        .then_with(|| a.name.cmp(&b.name))
}

fn revision_number(revision: &str) -> i64 {
    revision.parse().unwrap_or(-1)
}

/// Ready condition true, or phase Running/Succeeded when no such condition.
pub fn is_pod_ready(pod: &Document) -> bool {
    let ready_condition = pod.get_list("status.conditions").is_some_and(|conditions| {
        conditions.iter().any(|condition| {
            condition.get("type").and_then(Value::as_str) == Some("Ready")
                && condition.get("status").and_then(Value::as_str) == Some("True")
        })
    });
    ready_condition || matches!(pod.get_str("status.phase"), Some("Running" | "Succeeded"))
}

/// Containers then init containers of an object's pod template.
pub fn extract_containers(object: &Document) -> Vec<ContainerInfo> {
    let lists = [
        ("spec.template.spec.containers", ContainerKind::Container),
        ("spec.template.spec.initContainers", ContainerKind::InitContainer),
    ];
    lists
        .into_iter()
        .flat_map(|(path, kind)| {
            object
                .get_list(path)
                .into_iter()
                .flatten()
                .filter_map(Value::as_object)
                .map(move |container| {
                    let field = |key: &str| {
                        container
                            .get(key)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    ContainerInfo {
                        name: field("name"),
                        image: field("image"),
                        kind,
                    }
                })
        })
        .collect()
}
