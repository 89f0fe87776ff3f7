//! Rollout actions and workload image updates.
//!
//! Every action is a JSON merge patch on the rollout; the orchestrator
//! reacts to the changed fields and annotations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kruise_core::{DashError, DashResult, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::rollback::timestamp;

pub const RESTART_ANNOTATION: &str = "kruise.io/restart";
pub const APPROVED_ANNOTATION: &str = "kruise.io/approved";
pub const PROMOTE_ANNOTATION: &str = "kruise.io/promote";
pub const RETRY_ANNOTATION: &str = "kruise.io/retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutAction {
    Pause,
    Resume,
    Restart,
    Approve,
    /// Continue from the current step. Only valid while paused or progressing.
    Promote,
    /// Disable the rollout.
    Abort,
    Retry,
}

impl RolloutAction {
    pub const ALL: [RolloutAction; 7] = [
        Self::Pause,
        Self::Resume,
        Self::Restart,
        Self::Approve,
        Self::Promote,
        Self::Abort,
        Self::Retry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Restart => "restart",
            Self::Approve => "approve",
            Self::Promote => "promote",
            Self::Abort => "abort",
            Self::Retry => "retry",
        }
    }

    /// Merge patch applied to the rollout.
    pub fn patch(self, now: DateTime<Utc>) -> Value {
        let stamp = timestamp(now);
        let annotate = |key: &str, value: &str| json!({"metadata": {"annotations": {key: value}}});
        match self {
            Self::Pause => json!({"spec": {"paused": true}}),
            Self::Resume => json!({"spec": {"paused": false}}),
            Self::Restart => annotate(RESTART_ANNOTATION, &stamp),
            Self::Approve => annotate(APPROVED_ANNOTATION, "true"),
            Self::Promote => json!({
                "spec": {"paused": false},
                "metadata": {"annotations": {PROMOTE_ANNOTATION: stamp}}
            }),
            Self::Abort => json!({"spec": {"disabled": true}}),
            Self::Retry => json!({
                "spec": {"paused": false},
                "metadata": {"annotations": {RETRY_ANNOTATION: stamp}}
            }),
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Self::Pause => "Rollout paused successfully",
            Self::Resume => "Rollout resumed successfully",
            Self::Restart => "Rollout restarted successfully",
            Self::Approve => "Rollout approved successfully",
            Self::Promote => "Rollout promoted to next step",
            Self::Abort => "Rollout aborted successfully",
            Self::Retry => "Rollout retried successfully",
        }
    }
}

impl fmt::Display for RolloutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RolloutAction {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DashError::BadRequest(format!("unknown rollout action: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub message: String,
}

// ── Image updates ──────────────────────────────────────────────

/// Body of a set-image request. Either init flag selects `initContainers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetImageRequest {
    pub container: String,
    pub image: String,
    pub is_init_container: bool,
    pub init_container: bool,
}

impl SetImageRequest {
    pub fn targets_init_containers(&self) -> bool {
        self.is_init_container || self.init_container
    }

    pub fn validate(&self) -> DashResult<()> {
        if self.container.trim().is_empty() || self.image.trim().is_empty() {
            return Err(DashError::BadRequest("container and image are required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetImageOutcome {
    pub message: String,
    pub namespace: String,
    pub rollout: String,
    pub workload_kind: String,
    pub workload_name: String,
    pub container: String,
    pub image: String,
    pub init_container: bool,
}

/// Replace the image of every container named `container` in the pod
/// template's `containers` (or `initContainers`).
pub fn replace_image(
    workload: &mut Document,
    container: &str,
    image: &str,
    init_containers: bool,
) -> DashResult<()> {
    let path = if init_containers {
        "spec.template.spec.initContainers"
    } else {
        "spec.template.spec.containers"
    };
    let mut containers = workload
        .get_list(path)
        .filter(|list| !list.is_empty())
        .cloned()
        .ok_or_else(|| DashError::NotFound {
            code: "CONTAINERS_NOT_FOUND",
            message: "no containers found in workload".into(),
        })?;

    let mut replaced = false;
    for entry in containers.iter_mut().filter_map(Value::as_object_mut) {
        if entry.get("name").and_then(Value::as_str) == Some(container) {
            entry.insert("image".into(), Value::String(image.to_string()));
            replaced = true;
        }
    }
    if !replaced {
        return Err(DashError::NotFound {
            code: "CONTAINER_NOT_FOUND",
            message: format!("container {container} not found"),
        });
    }
    workload.set(path, Value::Array(containers))?;
    Ok(())
}
