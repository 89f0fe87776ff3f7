//! Typed reads over rollout documents.
//!
//! Rollouts are owned by the external orchestrator; this crate only reads
//! them. [`RolloutView`] centralizes the field paths so the services agree
//! on where the workload reference and revision hashes live.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::Document;

/// Weak reference from a rollout to its target workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
}

/// Borrowed, read-only view of a rollout document.
#[derive(Debug, Clone, Copy)]
pub struct RolloutView<'a> {
    doc: &'a Document,
}

impl<'a> RolloutView<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    /// Raw `spec.workloadRef`, falling back to `spec.objectRef.workloadRef`.
    pub fn workload_ref_raw(&self) -> Option<&'a Map<String, Value>> {
        self.doc
            .get_map("spec.workloadRef")
            .or_else(|| self.doc.get_map("spec.objectRef.workloadRef"))
    }

    /// Workload reference with both kind and name present.
    pub fn workload_ref(&self) -> Option<WorkloadRef> {
        let raw = self.workload_ref_raw()?;
        let field = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(WorkloadRef {
            api_version: field("apiVersion"),
            kind: field("kind")?,
            name: field("name")?,
        })
    }

    pub fn stable_revision(&self) -> Option<&'a str> {
        non_empty(self.doc.get_str("status.canaryStatus.stableRevision"))
    }

    /// Canary revision, falling back to `canaryStatus.podTemplateHash`.
    pub fn canary_revision(&self) -> Option<&'a str> {
        non_empty(self.doc.get_str("status.canaryStatus.canaryRevision"))
            .or_else(|| non_empty(self.doc.get_str("status.canaryStatus.podTemplateHash")))
    }

    pub fn phase(&self) -> Option<&'a str> {
        non_empty(self.doc.get_str("status.phase"))
    }

    pub fn is_paused(&self) -> bool {
        self.doc.get_bool("spec.paused").unwrap_or(false)
    }

    /// Promotion continues a paused or progressing rollout.
    pub fn is_promotable(&self) -> bool {
        self.is_paused() || matches!(self.phase(), Some("Paused" | "Progressing"))
    }

    /// Has a phase and has not completed.
    pub fn is_active(&self) -> bool {
        self.phase().is_some_and(|phase| phase != "Completed")
    }

    pub fn history(&self) -> Option<&'a Vec<Value>> {
        self.doc.get_list("status.history")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rollout(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn workload_ref_prefers_spec_workload_ref() {
        let doc = rollout(json!({"spec": {
            "workloadRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "d1"},
            "objectRef": {"workloadRef": {"kind": "CloneSet", "name": "c1"}}
        }}));
        let workload = RolloutView::new(&doc).workload_ref().unwrap();
        assert_eq!(workload.kind, "Deployment");
        assert_eq!(workload.api_version.as_deref(), Some("apps/v1"));
    }

    #[test]
    fn workload_ref_falls_back_to_object_ref() {
        let doc = rollout(json!({"spec": {"objectRef": {"workloadRef": {"kind": "CloneSet", "name": "c1"}}}}));
        assert_eq!(RolloutView::new(&doc).workload_ref().unwrap().name, "c1");
    }

    #[test]
    fn incomplete_workload_ref_is_raw_only() {
        let doc = rollout(json!({"spec": {"workloadRef": {"kind": "Deployment"}}}));
        let view = RolloutView::new(&doc);
        assert!(view.workload_ref_raw().is_some());
        assert!(view.workload_ref().is_none());
    }

    #[test]
    fn canary_revision_falls_back_to_pod_template_hash() {
        let doc = rollout(json!({"status": {"canaryStatus": {
            "stableRevision": "v1", "canaryRevision": "", "podTemplateHash": "v2"
        }}}));
        let view = RolloutView::new(&doc);
        assert_eq!(view.stable_revision(), Some("v1"));
        assert_eq!(view.canary_revision(), Some("v2"));
    }

    #[test]
    fn promotable_when_paused_or_in_progress() {
        let paused = rollout(json!({"spec": {"paused": true}, "status": {"phase": "Healthy"}}));
        let progressing = rollout(json!({"status": {"phase": "Progressing"}}));
        let healthy = rollout(json!({"status": {"phase": "Healthy"}}));
        assert!(RolloutView::new(&paused).is_promotable());
        assert!(RolloutView::new(&progressing).is_promotable());
        assert!(!RolloutView::new(&healthy).is_promotable());
    }

    #[test]
    fn active_requires_a_non_completed_phase() {
        let completed = rollout(json!({"status": {"phase": "Completed"}}));
        let no_phase = rollout(json!({"status": {}}));
        let running = rollout(json!({"status": {"phase": "Progressing"}}));
        assert!(!RolloutView::new(&completed).is_active());
        assert!(!RolloutView::new(&no_phase).is_active());
        assert!(RolloutView::new(&running).is_active());
    }
}
