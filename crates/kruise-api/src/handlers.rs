//! REST API handlers for namespaces and workloads.
//!
//! Workload kinds in the path are resolved by the registry inside
//! [`WorkloadService`](kruise_workload::WorkloadService); an unknown kind
//! answers 501.

use axum::extract::{Path, Query, State};
use kruise_cluster::ListQuery;
use kruise_core::registry::NAMESPACES;
use kruise_core::Document;
use kruise_workload::ops::parse_replicas;
use kruise_workload::{OpOutcome, ScaleOutcome, WorkloadList, WorkloadOverview, WorkloadPods};
use serde::Deserialize;

use crate::ApiState;
use crate::response::{ApiResult, ok};

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// ── Namespaces ─────────────────────────────────────────────────

/// GET /api/v1/namespaces
pub async fn list_namespaces(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    let namespaces = state
        .cluster
        .list(&NAMESPACES, "", &ListQuery::All)
        .await
        .map_err(|e| e.report("list namespaces", "", ""))?;
    let names = namespaces
        .items
        .iter()
        .filter_map(Document::name)
        .map(str::to_string)
        .collect();
    Ok(ok(names))
}

// ── Workloads ──────────────────────────────────────────────────

/// GET /api/v1/workload/:namespace
pub async fn workload_overview(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> ApiResult<WorkloadOverview> {
    Ok(ok(state.workloads.overview(&namespace).await))
}

/// GET /api/v1/workload/:namespace/:type
pub async fn list_workloads(
    State(state): State<ApiState>,
    Path((namespace, kind)): Path<(String, String)>,
) -> ApiResult<WorkloadList> {
    Ok(ok(state.workloads.list(&namespace, &kind).await?))
}

/// GET /api/v1/workload/:namespace/:type/:name
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<Document> {
    Ok(ok(state.workloads.get(&namespace, &kind, &name).await?))
}

/// GET /api/v1/workload/:namespace/:type/:name/pods
pub async fn workload_pods(
    State(state): State<ApiState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<WorkloadPods> {
    Ok(ok(state.workloads.pods(&namespace, &kind, &name).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ScaleQuery {
    pub replicas: Option<String>,
}

/// POST /api/v1/workload/:namespace/:type/:name/scale?replicas=N
pub async fn scale_workload(
    State(state): State<ApiState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
    Query(query): Query<ScaleQuery>,
) -> ApiResult<ScaleOutcome> {
    let replicas = parse_replicas(query.replicas.as_deref())?;
    Ok(ok(state.workloads.scale(&namespace, &kind, &name, replicas).await?))
}

/// POST /api/v1/workload/:namespace/:type/:name/restart
pub async fn restart_workload(
    State(state): State<ApiState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<OpOutcome> {
    Ok(ok(state.workloads.restart(&namespace, &kind, &name).await?))
}

/// DELETE /api/v1/workload/:namespace/:type/:name
pub async fn delete_workload(
    State(state): State<ApiState>,
    Path((namespace, kind, name)): Path<(String, String, String)>,
) -> ApiResult<OpOutcome> {
    Ok(ok(state.workloads.delete(&namespace, &kind, &name).await?))
}
