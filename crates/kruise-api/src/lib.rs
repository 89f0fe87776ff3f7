//! kruise-api — REST API for the Kruise dashboard.
//!
//! axum route handlers over the rollout, watch and workload services. All
//! responses use the JSON envelope in [`response`]; the watch feed is
//! served as Server-Sent Events.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/namespaces` | Namespace names |
//! | GET | `/api/v1/rollout/list/{namespace}` | List rollouts |
//! | GET | `/api/v1/rollout/default` | v1beta1 and v1alpha1 rollouts in `default` |
//! | GET | `/api/v1/rollout/active/{namespace}` | Rollouts not yet completed |
//! | GET | `/api/v1/rollout/watch/{namespace}` | SSE feed of a namespace |
//! | GET | `/api/v1/rollout/watch/{namespace}/{name}` | SSE feed of one rollout |
//! | GET | `/api/v1/rollout/{namespace}/{name}` | Get a rollout |
//! | GET | `/api/v1/rollout/{namespace}/{name}/pods` | Pods grouped by revision |
//! | GET | `/api/v1/rollout/status/{namespace}/{name}` | Rollout status |
//! | GET | `/api/v1/rollout/history/{namespace}/{name}` | Rollout history |
//! | POST | `/api/v1/rollout/{action}/{namespace}/{name}` | pause, resume, restart, approve, promote, abort, retry |
//! | POST | `/api/v1/rollout/rollback/{namespace}/{name}` | Restore the stable template |
//! | POST | `/api/v1/rollout/set-image/{namespace}/{name}` | Change a container image |
//! | GET | `/api/v1/workload/{namespace}` | Every OpenKruise kind |
//! | GET | `/api/v1/workload/{namespace}/{type}` | List workloads of a kind |
//! | GET, DELETE | `/api/v1/workload/{namespace}/{type}/{name}` | Get or delete a workload |
//! | GET | `/api/v1/workload/{namespace}/{type}/{name}/pods` | Pods of a workload |
//! | POST | `/api/v1/workload/{namespace}/{type}/{name}/scale?replicas=N` | Scale |
//! | POST | `/api/v1/workload/{namespace}/{type}/{name}/restart` | Restart |
//! | GET | `/healthz` | Liveness |
//!
//! Fixed segments win over captures: a namespace named like a fixed rollout
//! segment (`list`, `active`, `watch`, `default`, ...) may be shadowed on the
//! `/api/v1/rollout/{namespace}/...` routes. Such rollouts stay reachable
//! through `/api/v1/rollout/status/{namespace}/{name}`.

pub mod handlers;
pub mod response;
pub mod rollout_handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use kruise_cluster::ClusterApi;
use kruise_rollout::{RolloutAction, RolloutService};
use kruise_watch::{RolloutWatcher, WatchSettings};
use kruise_workload::{FanOut, WorkloadService};
use tower_http::trace::TraceLayer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub cluster: Arc<dyn ClusterApi>,
    pub rollouts: RolloutService,
    pub workloads: WorkloadService,
    pub watcher: RolloutWatcher,
}

impl ApiState {
    pub fn new(cluster: Arc<dyn ClusterApi>, fan_out: FanOut, watch: WatchSettings) -> Self {
        Self {
            rollouts: RolloutService::new(Arc::clone(&cluster)),
            workloads: WorkloadService::new(Arc::clone(&cluster), fan_out),
            watcher: RolloutWatcher::new(Arc::clone(&cluster), watch),
            cluster,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let mut rollout_routes = Router::new()
        .route("/list/{namespace}", get(rollout_handlers::list_rollouts))
        .route("/default", get(rollout_handlers::list_default_rollouts))
        .route("/active/{namespace}", get(rollout_handlers::list_active_rollouts))
        .route("/watch/{namespace}", get(rollout_handlers::watch_namespace))
        .route("/watch/{namespace}/{name}", get(rollout_handlers::watch_rollout))
        .route("/status/{namespace}/{name}", get(rollout_handlers::get_rollout))
        .route("/history/{namespace}/{name}", get(rollout_handlers::rollout_history))
        .route("/rollback/{namespace}/{name}", post(rollout_handlers::rollback))
        .route("/set-image/{namespace}/{name}", post(rollout_handlers::set_image))
        .route("/{namespace}/{name}", get(rollout_handlers::get_rollout))
        .route("/{namespace}/{name}/pods", get(rollout_handlers::rollout_pods));
    for action in RolloutAction::ALL {
        rollout_routes = rollout_routes.route(
            &format!("/{action}/{{namespace}}/{{name}}"),
            post(move |state: State<ApiState>, path: Path<(String, String)>| {
                rollout_handlers::act(state, path, action)
            }),
        );
    }

    let workload_routes = Router::new()
        .route("/{namespace}", get(handlers::workload_overview))
        .route("/{namespace}/{type}", get(handlers::list_workloads))
        .route(
            "/{namespace}/{type}/{name}",
            get(handlers::get_workload).delete(handlers::delete_workload),
        )
        .route("/{namespace}/{type}/{name}/pods", get(handlers::workload_pods))
        .route("/{namespace}/{type}/{name}/scale", post(handlers::scale_workload))
        .route("/{namespace}/{type}/{name}/restart", post(handlers::restart_workload));

    let api_routes = Router::new()
        .route("/namespaces", get(handlers::list_namespaces))
        .nest("/rollout", rollout_routes)
        .nest("/workload", workload_routes);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
