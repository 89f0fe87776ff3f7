//! Workload operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use kruise_cluster::{ClusterApi, ListQuery};
use kruise_core::ownership::document_owned_by;
use kruise_core::registry::{self, PODS, REPLICA_SETS, ResourceLocator, Revisioning, WorkloadType};
use kruise_core::selector::extract_label_selector;
use kruise_core::{DashError, DashResult, Document, OwnerKey};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::fanout::{FanOut, TaskOutcome};

pub const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadList {
    pub kind: &'static str,
    pub namespace: String,
    pub items: Vec<Document>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadPods {
    pub workload: Document,
    pub pods: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleOutcome {
    pub message: String,
    pub replicas: u32,
}

/// Every OpenKruise kind in a namespace, keyed by plural resource name.
/// A kind whose listing failed or timed out maps to `[{"error": ...}]`;
/// kinds still running at the deadline are listed in `pending`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadOverview {
    #[serde(flatten)]
    pub kinds: BTreeMap<String, Vec<Value>>,
    pub pending: Vec<String>,
}

/// Parse the `replicas` query parameter: required, non-negative.
pub fn parse_replicas(raw: Option<&str>) -> DashResult<u32> {
    let raw = raw
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| DashError::BadRequest("replicas parameter is required".into()))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|_| DashError::BadRequest("replicas must be a non-negative integer".into()))
}

/// Fallback pod query for workloads without a usable selector.
fn workload_fallback_query(workload_type: &WorkloadType, name: &str) -> String {
    format!("app={name},{}={name}", workload_type.key)
}

#[derive(Clone)]
pub struct WorkloadService {
    cluster: Arc<dyn ClusterApi>,
    fan_out: FanOut,
}

impl WorkloadService {
    pub fn new(cluster: Arc<dyn ClusterApi>, fan_out: FanOut) -> Self {
        Self { cluster, fan_out }
    }

    pub async fn get(&self, namespace: &str, kind: &str, name: &str) -> DashResult<Document> {
        let workload_type = registry::resolve(kind)?;
        self.fetch(workload_type, namespace, name).await
    }

    async fn fetch(&self, workload_type: &WorkloadType, namespace: &str, name: &str) -> DashResult<Document> {
        self.cluster
            .get(&workload_type.locator, namespace, name)
            .await
            .map_err(|e| e.report("get workload", namespace, name))
    }

    pub async fn list(&self, namespace: &str, kind: &str) -> DashResult<WorkloadList> {
        let workload_type = registry::resolve(kind)?;
        let items = self
            .cluster
            .list(&workload_type.locator, namespace, &ListQuery::All)
            .await
            .map_err(|e| e.report("list workloads", namespace, workload_type.key))?
            .items;
        Ok(WorkloadList {
            kind: workload_type.kind(),
            namespace: namespace.to_string(),
            total: items.len(),
            items,
        })
    }

    /// Pods owned by the workload, directly or through one of its
    /// ReplicaSets.
    pub async fn pods(&self, namespace: &str, kind: &str, name: &str) -> DashResult<WorkloadPods> {
        let workload_type = registry::resolve(kind)?;
        let workload = self.fetch(workload_type, namespace, name).await?;

        let selector = extract_label_selector(&workload);
        let query = if selector.is_empty() {
            workload_fallback_query(workload_type, name)
        } else {
            selector.clone()
        };
        let candidates = self
            .cluster
            .list(&PODS, namespace, &ListQuery::labels(&query))
            .await
            .map_err(|e| e.report("list workload pods", namespace, name))?
            .items;

        let replica_sets = match workload_type.revisioning {
            Revisioning::ReplicaSets => self.owned_replica_sets(&workload, workload_type, namespace, &query).await,
            Revisioning::PodLabel => Vec::new(),
        };
        let parent = OwnerKey::of(workload_type.kind(), &workload);
        let pods = candidates
            .into_iter()
            .filter(|pod| {
                document_owned_by(pod, parent)
                    || replica_sets
                        .iter()
                        .any(|rs| document_owned_by(pod, OwnerKey::of(REPLICA_SETS.kind, rs)))
            })
            .collect();

        Ok(WorkloadPods { pods, workload })
    }

    /// ReplicaSets owned by the workload; empty when the listing fails.
    async fn owned_replica_sets(
        &self,
        workload: &Document,
        workload_type: &WorkloadType,
        namespace: &str,
        query: &str,
    ) -> Vec<Document> {
        let parent = OwnerKey::of(workload_type.kind(), workload);
        match self
            .cluster
            .list(&REPLICA_SETS, namespace, &ListQuery::labels(query))
            .await
        {
            Ok(list) => list
                .items
                .into_iter()
                .filter(|rs| document_owned_by(rs, parent))
                .collect(),
            Err(e) => {
                warn!(namespace, name = parent.name, error = %e, "failed to list ReplicaSets");
                Vec::new()
            }
        }
    }

    pub async fn scale(&self, namespace: &str, kind: &str, name: &str, replicas: u32) -> DashResult<ScaleOutcome> {
        let workload_type = registry::resolve(kind)?;
        if !workload_type.scalable {
            return Err(DashError::OperationNotSupported {
                kind: workload_type.kind().to_string(),
                operation: "scaled",
            });
        }

        let patch = json!({"spec": {"replicas": replicas}});
        self.cluster
            .patch(&workload_type.locator, namespace, name, &patch, Some("scale"))
            .await
            .map_err(|e| e.report("scale workload", namespace, name))?;
        info!(namespace, name, kind = workload_type.key, replicas, "workload scaled");
        Ok(ScaleOutcome {
            message: format!("Successfully scaled {} {name} to {replicas} replicas", workload_type.key),
            replicas,
        })
    }

    /// Stamp the pod template so the controller rolls every pod.
    pub async fn restart(&self, namespace: &str, kind: &str, name: &str) -> DashResult<OpOutcome> {
        let workload_type = registry::resolve(kind)?;
        if !workload_type.restartable {
            return Err(DashError::OperationNotSupported {
                kind: workload_type.kind().to_string(),
                operation: "restarted",
            });
        }

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let patch = json!({"spec": {"template": {"metadata": {"annotations": {RESTARTED_AT: stamp}}}}});
        self.cluster
            .patch(&workload_type.locator, namespace, name, &patch, None)
            .await
            .map_err(|e| e.report("restart workload", namespace, name))?;
        info!(namespace, name, kind = workload_type.key, "workload restarted");
        Ok(OpOutcome {
            message: format!("Successfully restarted {} {name}", workload_type.key),
        })
    }

    pub async fn delete(&self, namespace: &str, kind: &str, name: &str) -> DashResult<OpOutcome> {
        let workload_type = registry::resolve(kind)?;
        self.cluster
            .delete(&workload_type.locator, namespace, name)
            .await
            .map_err(|e| e.report("delete workload", namespace, name))?;
        info!(namespace, name, kind = workload_type.key, "workload deleted");
        Ok(OpOutcome {
            message: format!("Successfully deleted {} {name}", workload_type.key),
        })
    }

    /// List every OpenKruise kind concurrently.
    pub async fn overview(&self, namespace: &str) -> WorkloadOverview {
        let locators: Vec<ResourceLocator> = registry::kruise_types().map(|t| t.locator).collect();
        let partial = self
            .fan_out
            .gather(locators, |locator| {
                let cluster = Arc::clone(&self.cluster);
                let namespace = namespace.to_string();
                async move {
                    cluster
                        .list(&locator, &namespace, &ListQuery::All)
                        .await
                        .map(|list| list.items)
                }
            })
            .await;

        let per_task = self.fan_out.per_task;
        let kinds = partial
            .results
            .into_iter()
            .map(|(locator, outcome)| {
                let entries = match outcome {
                    TaskOutcome::Done(items) => items.into_iter().map(Document::into_value).collect(),
                    TaskOutcome::Failed(message) => {
                        warn!(namespace, resource = locator.resource, error = %message, "workload listing failed");
                        vec![json!({"error": message})]
                    }
                    TaskOutcome::TimedOut => {
                        warn!(namespace, resource = locator.resource, "workload listing timed out");
                        vec![json!({"error": format!("timed out after {}s", per_task.as_secs())})]
                    }
                };
                (locator.resource.to_string(), entries)
            })
            .collect();

        WorkloadOverview {
            kinds,
            pending: partial.pending.iter().map(|l| l.resource.to_string()).collect(),
        }
    }
}
