//! Workload Type Registry.
//!
//! The single table that says which workload kinds exist, where they live
//! in the cluster API, and which operations they support. Every kind
//! string arriving from a caller is resolved here; handlers never match on
//! kind names themselves. New kinds are added to [`WORKLOAD_TYPES`] and
//! nowhere else.

use std::fmt;

use crate::error::{DashError, DashResult};

/// Where a resource lives in the cluster API (group/version/plural + kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceLocator {
    /// API group; empty for the core group.
    pub group: &'static str,
    pub version: &'static str,
    /// Plural resource name used in URLs.
    pub resource: &'static str,
    pub kind: &'static str,
    pub namespaced: bool,
}

impl ResourceLocator {
    /// `apiVersion` string as it appears in objects.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

const KRUISE_GROUP: &str = "apps.kruise.io";

pub const ROLLOUTS: ResourceLocator = ResourceLocator {
    group: "rollouts.kruise.io",
    version: "v1beta1",
    resource: "rollouts",
    kind: "Rollout",
    namespaced: true,
};

/// Rollouts still stored at the older API version.
pub const ROLLOUTS_V1ALPHA1: ResourceLocator = ResourceLocator {
    version: "v1alpha1",
    ..ROLLOUTS
};

pub const REPLICA_SETS: ResourceLocator = ResourceLocator {
    group: "apps",
    version: "v1",
    resource: "replicasets",
    kind: "ReplicaSet",
    namespaced: true,
};

pub const PODS: ResourceLocator = ResourceLocator {
    group: "",
    version: "v1",
    resource: "pods",
    kind: "Pod",
    namespaced: true,
};

pub const NAMESPACES: ResourceLocator = ResourceLocator {
    group: "",
    version: "v1",
    resource: "namespaces",
    kind: "Namespace",
    namespaced: false,
};

/// How pods of a workload are grouped into revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revisioning {
    /// Each revision is an owned ReplicaSet (Deployment-style).
    ReplicaSets,
    /// Pods carry a `controller-revision-hash` label (CloneSet/StatefulSet-style).
    PodLabel,
}

/// A registered workload kind and its capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadType {
    /// Lower-case logical name used in URLs (`cloneset`).
    pub key: &'static str,
    pub locator: ResourceLocator,
    pub scalable: bool,
    pub restartable: bool,
    pub revisioning: Revisioning,
}

impl WorkloadType {
    pub fn kind(&self) -> &'static str {
        self.locator.kind
    }

    /// Whether this kind is an OpenKruise workload (listed in overviews).
    pub fn is_kruise(&self) -> bool {
        self.locator.group == KRUISE_GROUP
    }

    /// Whether rollback to a stable ReplicaSet template is possible.
    pub fn supports_rollback(&self) -> bool {
        self.revisioning == Revisioning::ReplicaSets
    }
}

const fn kruise(
    key: &'static str,
    version: &'static str,
    resource: &'static str,
    kind: &'static str,
    scalable: bool,
    restartable: bool,
) -> WorkloadType {
    WorkloadType {
        key,
        locator: ResourceLocator {
            group: KRUISE_GROUP,
            version,
            resource,
            kind,
            namespaced: true,
        },
        scalable,
        restartable,
        revisioning: Revisioning::PodLabel,
    }
}

/// Every workload kind the dashboard understands.
pub static WORKLOAD_TYPES: &[WorkloadType] = &[
    WorkloadType {
        key: "deployment",
        locator: ResourceLocator {
            group: "apps",
            version: "v1",
            resource: "deployments",
            kind: "Deployment",
            namespaced: true,
        },
        scalable: true,
        restartable: true,
        revisioning: Revisioning::ReplicaSets,
    },
    kruise("cloneset", "v1alpha1", "clonesets", "CloneSet", true, true),
    kruise("statefulset", "v1beta1", "statefulsets", "StatefulSet", true, true),
    kruise("daemonset", "v1alpha1", "daemonsets", "DaemonSet", false, true),
    kruise("broadcastjob", "v1alpha1", "broadcastjobs", "BroadcastJob", false, false),
    kruise("advancedcronjob", "v1alpha1", "advancedcronjobs", "AdvancedCronJob", false, false),
    WorkloadType {
        key: "replicaset",
        locator: REPLICA_SETS,
        scalable: true,
        restartable: false,
        revisioning: Revisioning::PodLabel,
    },
];

/// Resolve a workload kind by logical name or kind, case-insensitively.
pub fn resolve(name: &str) -> DashResult<&'static WorkloadType> {
    WORKLOAD_TYPES
        .iter()
        .find(|t| t.key.eq_ignore_ascii_case(name) || t.kind().eq_ignore_ascii_case(name))
        .ok_or_else(|| DashError::unsupported_kind(name))
}

/// OpenKruise workload kinds, in registry order.
pub fn kruise_types() -> impl Iterator<Item = &'static WorkloadType> {
    WORKLOAD_TYPES.iter().filter(|t| t.is_kruise())
}

/// Locator for an object `kind`, covering workloads and the auxiliary
/// resources the dashboard reads.
pub fn locator_for_kind(kind: &str) -> Option<ResourceLocator> {
    if let Ok(t) = resolve(kind) {
        return Some(t.locator);
    }
    [ROLLOUTS, PODS, NAMESPACES]
        .into_iter()
        .find(|l| l.kind.eq_ignore_ascii_case(kind))
}
