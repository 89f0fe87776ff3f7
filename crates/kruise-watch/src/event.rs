//! Wire events of the rollout feed.

use chrono::{SecondsFormat, Utc};
use kruise_core::Document;
use serde::Serialize;

/// Resource type tag carried in every payload.
pub const RESOURCE_TYPE: &str = "rollout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Snapshot,
    Upsert,
    Delete,
    Heartbeat,
    Error,
}

impl WatchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPayload {
    #[serde(rename = "type")]
    pub resource_type: &'static str,
    pub namespace: String,
    pub name: String,
    pub resource_version: String,
    pub rollout: Option<Document>,
    /// RFC 3339 with nanoseconds, UTC.
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub payload: WatchPayload,
}

impl WatchEvent {
    /// Event about `rollout`. Namespace and name come from the object,
    /// falling back to the stream scope.
    pub fn object(
        kind: WatchEventKind,
        rollout: Document,
        scope_namespace: &str,
        scope_name: Option<&str>,
        cursor: &str,
    ) -> Self {
        let namespace = rollout.namespace().unwrap_or(scope_namespace).to_string();
        let name = rollout
            .name()
            .or(scope_name)
            .unwrap_or_default()
            .to_string();
        Self::build(kind, namespace, name, cursor, Some(rollout), None)
    }

    /// Event without an object (heartbeats and errors).
    pub fn bare(
        kind: WatchEventKind,
        scope_namespace: &str,
        scope_name: Option<&str>,
        cursor: &str,
        message: Option<String>,
    ) -> Self {
        Self::build(
            kind,
            scope_namespace.to_string(),
            scope_name.unwrap_or_default().to_string(),
            cursor,
            None,
            message,
        )
    }

    fn build(
        kind: WatchEventKind,
        namespace: String,
        name: String,
        cursor: &str,
        rollout: Option<Document>,
        message: Option<String>,
    ) -> Self {
        Self {
            kind,
            payload: WatchPayload {
                resource_type: RESOURCE_TYPE,
                namespace,
                name,
                resource_version: cursor.to_string(),
                rollout,
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_schema() {
        let rollout = Document::from_value(json!({"metadata": {"name": "r1", "namespace": "ns1"}})).unwrap();
        let event = WatchEvent::object(WatchEventKind::Upsert, rollout, "ns1", None, "42");
        let value = serde_json::to_value(&event.payload).unwrap();
        assert_eq!(value["type"], "rollout");
        assert_eq!(value["namespace"], "ns1");
        assert_eq!(value["name"], "r1");
        assert_eq!(value["resourceVersion"], "42");
        assert_eq!(value["rollout"]["metadata"]["name"], "r1");
        assert!(value["ts"].as_str().unwrap().ends_with('Z'));
        assert!(value.get("message").is_none());
    }

    #[test]
    fn bare_events_fall_back_to_scope_and_carry_null_rollout() {
        let event = WatchEvent::bare(
            WatchEventKind::Error,
            "ns1",
            Some("r1"),
            "7",
            Some("watch stream closed".into()),
        );
        let value = serde_json::to_value(&event.payload).unwrap();
        assert_eq!(value["name"], "r1");
        assert!(value["rollout"].is_null());
        assert_eq!(value["message"], "watch stream closed");
        assert_eq!(event.kind.as_str(), "error");
    }
}
