//! REST API handlers for rollouts, plus the SSE watch feed.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use kruise_core::Document;
use kruise_rollout::{
    ActionOutcome, DefaultRolloutList, RollbackOutcome, RolloutAction, RolloutList, RolloutPods, SetImageOutcome, SetImageRequest,
};
use kruise_watch::{WatchEvent, WatchScope};
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::ApiState;
use crate::response::{ApiError, ApiResult, ok};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// GET /api/v1/rollout/list/:namespace
pub async fn list_rollouts(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> ApiResult<RolloutList> {
    Ok(ok(state.rollouts.list(&namespace).await?))
}

/// GET /api/v1/rollout/default
pub async fn list_default_rollouts(State(state): State<ApiState>) -> ApiResult<DefaultRolloutList> {
    Ok(ok(state.rollouts.list_default().await?))
}

/// GET /api/v1/rollout/active/:namespace
pub async fn list_active_rollouts(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> ApiResult<Vec<Document>> {
    Ok(ok(state.rollouts.list_active(&namespace).await?))
}

/// GET /api/v1/rollout/:namespace/:name and /rollout/status/:namespace/:name
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Document> {
    Ok(ok(state.rollouts.get(&namespace, &name).await?))
}

/// GET /api/v1/rollout/history/:namespace/:name
///
/// The bare `status.history` array, or `{"history": null}` when the rollout
/// records none.
pub async fn rollout_history(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Value> {
    let history = match state.rollouts.history(&namespace, &name).await? {
        Some(entries) => Value::Array(entries),
        None => json!({ "history": null }),
    };
    Ok(ok(history))
}

/// GET /api/v1/rollout/:namespace/:name/pods
pub async fn rollout_pods(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<RolloutPods> {
    Ok(ok(state.rollouts.pods(&namespace, &name).await?))
}

// ── Mutations ──────────────────────────────────────────────────

/// POST /api/v1/rollout/:action/:namespace/:name
pub async fn act(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    action: RolloutAction,
) -> ApiResult<ActionOutcome> {
    Ok(ok(state.rollouts.act(&namespace, &name, action).await?))
}

/// POST /api/v1/rollout/rollback/:namespace/:name
pub async fn rollback(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<RollbackOutcome> {
    Ok(ok(state.rollouts.rollback(&namespace, &name).await?))
}

/// POST /api/v1/rollout/set-image/:namespace/:name
pub async fn set_image(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<SetImageRequest>,
) -> ApiResult<SetImageOutcome> {
    Ok(ok(state.rollouts.set_image(&namespace, &name, &request).await?))
}

// ── Watch ──────────────────────────────────────────────────────

/// GET /api/v1/rollout/watch/:namespace
pub async fn watch_namespace(State(state): State<ApiState>, Path(namespace): Path<String>) -> Response {
    stream_rollouts(state, WatchScope::namespace(namespace)).await
}

/// GET /api/v1/rollout/watch/:namespace/:name
pub async fn watch_rollout(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    stream_rollouts(state, WatchScope::rollout(namespace, name)).await
}

/// Open the feed before answering, so a failed list or watch is a 503
/// envelope rather than an empty stream.
async fn stream_rollouts(state: ApiState, scope: WatchScope) -> Response {
    let session = match state.watcher.open(scope.clone()).await {
        Ok(session) => session,
        Err(e) => return ApiError(e).into_response(),
    };
    info!(
        namespace = %scope.namespace,
        name = scope.name.as_deref().unwrap_or_default(),
        cursor = session.cursor(),
        "rollout watch stream started"
    );

    let events = ReceiverStream::new(session.spawn()).map(sse_event);
    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
        ],
        Sse::new(events),
    )
        .into_response()
}

fn sse_event(event: WatchEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.kind.as_str()).json_data(&event.payload)
}
