//! Rollout service: reads, pods detail, actions, rollback and image updates.

use std::sync::Arc;

use chrono::Utc;
use kruise_cluster::{ClusterApi, ListQuery};
use kruise_core::registry::{self, REPLICA_SETS, ROLLOUTS, ROLLOUTS_V1ALPHA1, Revisioning, WorkloadType};
use kruise_core::selector::{extract_label_selector, fallback_query};
use kruise_core::{DashError, DashResult, Document, RolloutView};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::actions::{ActionOutcome, RolloutAction, SetImageOutcome, SetImageRequest, replace_image};
use crate::revisions::{
    ContainerInfo, RevisionCohort, RevisionMarks, extract_containers, reconcile_pod_labels,
    reconcile_replica_sets,
};
use crate::rollback::{RollbackOutcome, apply_stable_template, find_stable_replica_set, rollback_target};

#[derive(Debug, Clone, Serialize)]
pub struct RolloutList {
    pub rollouts: Vec<Document>,
    pub total: usize,
    pub namespace: String,
}

/// Rollouts of the `default` namespace across both served API versions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRolloutList {
    pub rollouts: Vec<Document>,
    pub total: usize,
    pub namespace: String,
    pub api_versions: Vec<&'static str>,
}

/// Pods of a rollout's workload, grouped into revisions when the workload
/// could be resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPods {
    pub pods: Vec<Document>,
    pub workload_ref: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Vec<RevisionCohort>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerInfo>>,
}

impl RolloutPods {
    fn bare(pods: Vec<Document>, workload_ref: Option<Map<String, Value>>) -> Self {
        Self {
            pods,
            workload_ref,
            revisions: None,
            containers: None,
        }
    }
}

/// Rollout operations over an injected cluster client.
#[derive(Clone)]
pub struct RolloutService {
    cluster: Arc<dyn ClusterApi>,
}

impl RolloutService {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> DashResult<Document> {
        self.cluster
            .get(&ROLLOUTS, namespace, name)
            .await
            .map_err(|e| e.report("get rollout", namespace, name))
    }

    pub async fn list(&self, namespace: &str) -> DashResult<RolloutList> {
        let rollouts = self.list_items(namespace).await?;
        Ok(RolloutList {
            total: rollouts.len(),
            rollouts,
            namespace: namespace.to_string(),
        })
    }

    /// Rollouts with a phase other than `Completed`.
    pub async fn list_active(&self, namespace: &str) -> DashResult<Vec<Document>> {
        let mut rollouts = self.list_items(namespace).await?;
        rollouts.retain(|rollout| RolloutView::new(rollout).is_active());
        Ok(rollouts)
    }

    async fn list_items(&self, namespace: &str) -> DashResult<Vec<Document>> {
        self.cluster
            .list(&ROLLOUTS, namespace, &ListQuery::All)
            .await
            .map(|list| list.items)
            .map_err(|e| e.report("list rollouts", namespace, ""))
    }

    /// v1beta1 and v1alpha1 rollouts in `default`. A version that fails to
    /// list is skipped; only when both fail is the error returned.
    pub async fn list_default(&self) -> DashResult<DefaultRolloutList> {
        const NAMESPACE: &str = "default";
        let mut rollouts = Vec::new();
        let mut listed = false;
        let mut last_error = None;
        for locator in [ROLLOUTS, ROLLOUTS_V1ALPHA1] {
            match self.cluster.list(&locator, NAMESPACE, &ListQuery::All).await {
                Ok(list) => {
                    listed = true;
                    rollouts.extend(list.items);
                }
                Err(e) => {
                    warn!(version = locator.version, error = %e, "listing default rollouts failed");
                    last_error = Some(e);
                }
            }
        }
        if let (false, Some(e)) = (listed, last_error) {
            return Err(e.report("list default rollouts", NAMESPACE, ""));
        }
        Ok(DefaultRolloutList {
            total: rollouts.len(),
            rollouts,
            namespace: NAMESPACE.to_string(),
            api_versions: vec![ROLLOUTS.version, ROLLOUTS_V1ALPHA1.version],
        })
    }

    /// `status.history`, or `None` when the rollout records none.
    pub async fn history(&self, namespace: &str, name: &str) -> DashResult<Option<Vec<Value>>> {
        let rollout = self.get(namespace, name).await?;
        Ok(RolloutView::new(&rollout).history().cloned())
    }

    pub async fn pods(&self, namespace: &str, name: &str) -> DashResult<RolloutPods> {
        let rollout = self.get(namespace, name).await?;
        let view = RolloutView::new(&rollout);

        let Some(raw_ref) = view.workload_ref_raw() else {
            return Ok(RolloutPods::bare(Vec::new(), None));
        };
        let Some(workload_ref) = view.workload_ref() else {
            return Ok(RolloutPods::bare(Vec::new(), Some(raw_ref.clone())));
        };
        let marks = RevisionMarks {
            stable: view.stable_revision(),
            canary: view.canary_revision(),
        };

        let workload_type = match registry::resolve(&workload_ref.kind) {
            Ok(t) => t,
            Err(_) => {
                warn!(
                    namespace,
                    kind = %workload_ref.kind,
                    "unresolvable workloadRef kind; falling back to app label"
                );
                let pods = self
                    .list_pods(namespace, &fallback_query(&workload_ref.name))
                    .await?;
                return Ok(RolloutPods::bare(pods, Some(raw_ref.clone())));
            }
        };

        let workload = self
            .cluster
            .get(&workload_type.locator, namespace, &workload_ref.name)
            .await
            .map_err(|e| e.report("get workload", namespace, &workload_ref.name))?;
        let selector = extract_label_selector(&workload);
        let pod_query = if selector.is_empty() {
            fallback_query(&workload_ref.name)
        } else {
            selector.clone()
        };
        let pods = self.list_pods(namespace, &pod_query).await?;

        let revisions = match workload_type.revisioning {
            Revisioning::ReplicaSets => {
                let replica_sets = self
                    .replica_sets_or_empty(namespace, &selector)
                    .await;
                reconcile_replica_sets(&workload, workload_type.kind(), &replica_sets, &pods, marks)
            }
            Revisioning::PodLabel => reconcile_pod_labels(&pods, marks),
        };

        Ok(RolloutPods {
            containers: Some(extract_containers(&workload)),
            revisions: Some(revisions),
            pods,
            workload_ref: Some(raw_ref.clone()),
        })
    }

    async fn list_pods(&self, namespace: &str, query: &str) -> DashResult<Vec<Document>> {
        self.cluster
            .list(&registry::PODS, namespace, &ListQuery::labels(query))
            .await
            .map(|list| list.items)
            .map_err(|e| e.report("list pods", namespace, query))
    }

    /// ReplicaSets matching `selector`; empty on an empty selector or a
    /// failed listing, which leaves the revision list empty.
    async fn replica_sets_or_empty(&self, namespace: &str, selector: &str) -> Vec<Document> {
        if selector.is_empty() {
            return Vec::new();
        }
        match self
            .cluster
            .list(&REPLICA_SETS, namespace, &ListQuery::labels(selector))
            .await
        {
            Ok(list) => list.items,
            Err(e) => {
                warn!(namespace, selector, error = %e, "failed to list ReplicaSets");
                Vec::new()
            }
        }
    }

    // ── Actions ────────────────────────────────────────────────

    pub async fn act(&self, namespace: &str, name: &str, action: RolloutAction) -> DashResult<ActionOutcome> {
        if action == RolloutAction::Promote {
            let rollout = self.get(namespace, name).await?;
            if !RolloutView::new(&rollout).is_promotable() {
                return Err(DashError::PreconditionFailed {
                    code: "ROLLOUT_NOT_PROMOTABLE",
                    message: "rollout is not in a promotable state".into(),
                });
            }
        }

        self.cluster
            .patch(&ROLLOUTS, namespace, name, &action.patch(Utc::now()), None)
            .await
            .map_err(|e| e.report(action.as_str(), namespace, name))?;
        info!(namespace, name, %action, "rollout action applied");
        Ok(ActionOutcome {
            message: action.success_message().to_string(),
        })
    }

    /// Restore the workload's pod template from its stable ReplicaSet.
    pub async fn rollback(&self, namespace: &str, name: &str) -> DashResult<RollbackOutcome> {
        let rollout = self.get(namespace, name).await?;
        let target = rollback_target(&rollout)?;
        let locator = &target.workload.locator;

        let workload = self
            .cluster
            .get(locator, namespace, &target.name)
            .await
            .map_err(|e| e.report("get workload for rollback", namespace, &target.name))?;
        let selector = extract_label_selector(&workload);
        let replica_sets = if selector.is_empty() {
            Vec::new()
        } else {
            self.cluster
                .list(&REPLICA_SETS, namespace, &ListQuery::labels(&selector))
                .await
                .map_err(|e| e.report("list replicasets for rollback", namespace, &target.name))?
                .items
        };

        let stable = find_stable_replica_set(
            &workload,
            target.workload.kind(),
            &replica_sets,
            &target.stable_revision,
        )?;
        let updated = apply_stable_template(&workload, stable, Utc::now())?;
        self.cluster
            .update(locator, namespace, &updated)
            .await
            .map_err(|e| e.report("update workload for rollback", namespace, &target.name))?;

        info!(
            namespace,
            rollout = name,
            workload = %target.name,
            stable_revision = %target.stable_revision,
            "rollback completed"
        );
        Ok(RollbackOutcome {
            message: "Rollback completed".into(),
            rollout: name.to_string(),
            namespace: namespace.to_string(),
            workload_kind: target.workload.kind().to_string(),
            workload_name: target.name,
            stable_revision: target.stable_revision,
        })
    }

    /// Change one container image in the rollout's workload.
    pub async fn set_image(
        &self,
        namespace: &str,
        name: &str,
        request: &SetImageRequest,
    ) -> DashResult<SetImageOutcome> {
        request.validate()?;
        let rollout = self.get(namespace, name).await?;
        let view = RolloutView::new(&rollout);
        if view.workload_ref_raw().is_none() {
            return Err(DashError::PreconditionFailed {
                code: "WORKLOAD_REF_MISSING",
                message: "workloadRef is not configured".into(),
            });
        }
        let workload_ref = view.workload_ref().ok_or_else(|| DashError::PreconditionFailed {
            code: "WORKLOAD_REF_INVALID",
            message: "workloadRef is incomplete".into(),
        })?;
        let workload_type: &WorkloadType = registry::resolve(&workload_ref.kind)?;

        let mut workload = self
            .cluster
            .get(&workload_type.locator, namespace, &workload_ref.name)
            .await
            .map_err(|e| e.report("get workload for image update", namespace, &workload_ref.name))?;
        let init = request.targets_init_containers();
        replace_image(&mut workload, &request.container, &request.image, init)?;
        self.cluster
            .update(&workload_type.locator, namespace, &workload)
            .await
            .map_err(|e| e.report("update workload image", namespace, &workload_ref.name))?;

        info!(
            namespace,
            rollout = name,
            workload = %workload_ref.name,
            container = %request.container,
            image = %request.image,
            "workload image updated"
        );
        Ok(SetImageOutcome {
            message: "Image updated successfully".into(),
            namespace: namespace.to_string(),
            rollout: name.to_string(),
            workload_kind: workload_ref.kind,
            workload_name: workload_ref.name,
            container: request.container.clone(),
            image: request.image.clone(),
            init_container: init,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kruise_cluster::{InMemoryCluster, Operation};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn rollout(workload_kind: &str, stable: &str, canary: &str) -> Document {
        doc(json!({
            "kind": "Rollout",
            "metadata": {"name": "r1", "namespace": "ns1"},
            "spec": {"workloadRef": {"apiVersion": "apps/v1", "kind": workload_kind, "name": "d1"}},
            "status": {"phase": "Progressing", "canaryStatus": {"stableRevision": stable, "canaryRevision": canary}}
        }))
    }

    fn deployment() -> Document {
        doc(json!({
            "kind": "Deployment",
            "metadata": {"name": "d1", "namespace": "ns1", "uid": "d1-uid"},
            "spec": {
                "selector": {"matchLabels": {"app": "d1"}},
                "template": {"spec": {"containers": [{"name": "app", "image": "app:v2"}]}}
            }
        }))
    }

    fn replica_set(hash: &str, replicas: i64, ready: i64) -> Document {
        doc(json!({
            "kind": "ReplicaSet",
            "metadata": {
                "name": format!("d1-{hash}"),
                "namespace": "ns1",
                "uid": format!("rs-{hash}"),
                "labels": {"app": "d1", "pod-template-hash": hash},
                "ownerReferences": [{"kind": "Deployment", "name": "d1", "uid": "d1-uid"}]
            },
            "spec": {"replicas": replicas, "template": {"spec": {"containers": [
                {"name": "app", "image": format!("app:{hash}")}
            ]}}},
            "status": {"readyReplicas": ready}
        }))
    }

    fn pod(name: &str, hash: &str) -> Document {
        doc(json!({
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": "ns1",
                "labels": {"app": "d1", "pod-template-hash": hash},
                "ownerReferences": [{"kind": "ReplicaSet", "name": format!("d1-{hash}"), "uid": format!("rs-{hash}")}]
            },
            "status": {"phase": "Running"}
        }))
    }

    fn cluster_with(objects: Vec<Document>) -> (InMemoryCluster, RolloutService) {
        let cluster = InMemoryCluster::new();
        cluster.seed(objects).unwrap();
        let service = RolloutService::new(Arc::new(cluster.clone()));
        (cluster, service)
    }

    fn default_rollout(name: &str) -> Document {
        doc(json!({"kind": "Rollout", "metadata": {"name": name, "namespace": "default"}}))
    }

    #[tokio::test]
    async fn default_listing_merges_both_versions() {
        let (cluster, service) = cluster_with(vec![default_rollout("beta"), rollout("Deployment", "v1", "v2")]);
        cluster.apply(ROLLOUTS_V1ALPHA1, default_rollout("alpha")).unwrap();

        let list = service.list_default().await.unwrap();
        let names: Vec<_> = list.rollouts.iter().filter_map(Document::name).collect();
        assert_eq!(names, ["beta", "alpha"]);
        assert_eq!(list.total, 2);
        assert_eq!(list.namespace, "default");
        assert_eq!(list.api_versions, ["v1beta1", "v1alpha1"]);
    }

    #[tokio::test]
    async fn default_listing_fails_only_when_every_version_fails() {
        let (cluster, service) = cluster_with(vec![default_rollout("beta")]);
        cluster.fail(Operation::List, ROLLOUTS_V1ALPHA1, "no v1alpha1 served");
        assert_eq!(service.list_default().await.unwrap().total, 1);

        cluster.fail(Operation::List, ROLLOUTS, "apiserver down");
        assert!(service.list_default().await.is_err());
    }

    fn canary_scenario() -> Vec<Document> {
        vec![
            rollout("Deployment", "v1", "v2"),
            deployment(),
            replica_set("v1", 3, 3),
            replica_set("v2", 2, 1),
            pod("p1", "v1"),
            pod("p2", "v1"),
            pod("p3", "v1"),
            pod("p4", "v2"),
        ]
    }

    #[tokio::test]
    async fn pods_detail_orders_canary_before_stable() {
        let (_, service) = cluster_with(canary_scenario());
        let detail = service.pods("ns1", "r1").await.unwrap();

        assert_eq!(detail.pods.len(), 4);
        let revisions = detail.revisions.unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].pod_template_hash, "v2");
        assert!(revisions[0].is_canary);
        assert_eq!((revisions[0].replicas, revisions[0].ready_replicas), (2, 1));
        assert_eq!(revisions[1].pod_template_hash, "v1");
        assert!(revisions[1].is_stable);
        assert_eq!((revisions[1].replicas, revisions[1].ready_replicas), (3, 3));
        assert_eq!(detail.containers.unwrap()[0].image, "app:v2");
    }

    #[tokio::test]
    async fn pods_detail_without_workload_ref() {
        let bare = doc(json!({"kind": "Rollout", "metadata": {"name": "r1", "namespace": "ns1"}, "spec": {}}));
        let (_, service) = cluster_with(vec![bare]);
        let detail = service.pods("ns1", "r1").await.unwrap();
        assert!(detail.pods.is_empty());
        assert!(detail.workload_ref.is_none());
        assert!(detail.revisions.is_none());
    }

    #[tokio::test]
    async fn unknown_workload_kind_falls_back_to_app_label() {
        let mut objects = canary_scenario();
        objects[0] = rollout("Widget", "v1", "v2");
        let (_, service) = cluster_with(objects);

        let detail = service.pods("ns1", "r1").await.unwrap();
        assert_eq!(detail.pods.len(), 4);
        assert!(detail.revisions.is_none());
        assert_eq!(detail.workload_ref.unwrap()["kind"], "Widget");
    }

    #[tokio::test]
    async fn failed_replica_set_listing_degrades_to_no_revisions() {
        let (cluster, service) = cluster_with(canary_scenario());
        cluster.fail(Operation::List, REPLICA_SETS, "boom");
        let detail = service.pods("ns1", "r1").await.unwrap();
        assert_eq!(detail.pods.len(), 4);
        assert_eq!(detail.revisions.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn rollback_restores_the_stable_template() {
        let (cluster, service) = cluster_with(canary_scenario());
        let outcome = service.rollback("ns1", "r1").await.unwrap();
        assert_eq!(outcome.workload_kind, "Deployment");
        assert_eq!(outcome.stable_revision, "v1");

        let registry_deployment = registry::resolve("deployment").unwrap().locator;
        let live = cluster.object(registry_deployment, "ns1", "d1").unwrap();
        let containers = live.get_list("spec.template.spec.containers").unwrap();
        assert_eq!(containers[0]["image"], "app:v1");
        assert!(live.annotation(crate::rollback::ROLLED_BACK_AT).is_some());
    }

    #[tokio::test]
    async fn rollback_without_matching_replica_set_changes_nothing() {
        let mut objects = canary_scenario();
        objects[0] = rollout("Deployment", "gone", "v2");
        let (cluster, service) = cluster_with(objects);

        let err = service.rollback("ns1", "r1").await.unwrap_err();
        assert_eq!(err.code(), "STABLE_REPLICASET_NOT_FOUND");
        let live = cluster
            .object(registry::resolve("deployment").unwrap().locator, "ns1", "d1")
            .unwrap();
        assert_eq!(live.get_list("spec.template.spec.containers").unwrap()[0]["image"], "app:v2");
    }

    #[tokio::test]
    async fn promote_requires_a_promotable_rollout() {
        let mut healthy = rollout("Deployment", "v1", "v2");
        healthy.set("status.phase", json!("Healthy")).unwrap();
        let (cluster, service) = cluster_with(vec![healthy]);

        let err = service.act("ns1", "r1", RolloutAction::Promote).await.unwrap_err();
        assert_eq!(err.code(), "ROLLOUT_NOT_PROMOTABLE");

        service.act("ns1", "r1", RolloutAction::Pause).await.unwrap();
        let outcome = service.act("ns1", "r1", RolloutAction::Promote).await.unwrap();
        assert_eq!(outcome.message, "Rollout promoted to next step");
        let live = cluster.object(ROLLOUTS, "ns1", "r1").unwrap();
        assert_eq!(live.get_bool("spec.paused"), Some(false));
        assert!(live.annotation(crate::actions::PROMOTE_ANNOTATION).is_some());
    }

    #[tokio::test]
    async fn actions_on_missing_rollouts_are_not_found() {
        let (_, service) = cluster_with(Vec::new());
        let err = service.act("ns1", "r1", RolloutAction::Pause).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn active_excludes_completed_and_phaseless() {
        let mut done = rollout("Deployment", "v1", "v2");
        done.set("metadata.name", json!("done")).unwrap();
        done.set("status.phase", json!("Completed")).unwrap();
        let idle = doc(json!({"kind": "Rollout", "metadata": {"name": "idle", "namespace": "ns1"}}));
        let (_, service) = cluster_with(vec![rollout("Deployment", "v1", "v2"), done, idle]);

        let list = service.list("ns1").await.unwrap();
        assert_eq!(list.total, 3);
        let active = service.list_active("ns1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name(), Some("r1"));
    }

    #[tokio::test]
    async fn set_image_updates_the_workload() {
        let (cluster, service) = cluster_with(canary_scenario());
        let request = SetImageRequest {
            container: "app".into(),
            image: "app:v3".into(),
            ..Default::default()
        };
        let outcome = service.set_image("ns1", "r1", &request).await.unwrap();
        assert!(!outcome.init_container);

        let live = cluster
            .object(registry::resolve("deployment").unwrap().locator, "ns1", "d1")
            .unwrap();
        assert_eq!(live.get_list("spec.template.spec.containers").unwrap()[0]["image"], "app:v3");
    }
}
