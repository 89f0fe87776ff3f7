//! Dynamic document: a schema-less cluster object.
//!
//! Cluster objects arrive as nested JSON maps with no fixed object graph.
//! [`Document`] keeps that flexibility while giving call sites typed,
//! explicit accessors: every read returns `Option`, so an absent field is
//! a visible "not found" rather than a silent default.
//!
//! Paths are dotted (`spec.template.spec.containers`). Label and
//! annotation keys routinely contain dots themselves
//! (`deployment.kubernetes.io/revision`), so those are read through
//! [`Document::label`] and [`Document::annotation`] instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while building or mutating a [`Document`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document root must be a JSON object")]
    NotAnObject,

    #[error("field `{0}` exists but is not an object")]
    NotAMap(String),

    #[error("empty field path")]
    EmptyPath,
}

/// A loosely-typed cluster object (JSON object at the root).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

/// One entry of `metadata.ownerReferences`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    /// Absent on some synthetic objects.
    pub uid: Option<String>,
}

impl Document {
    /// Empty document (`{}`).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Look up a value by dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    pub fn get_list(&self, path: &str) -> Option<&Vec<Value>> {
        self.get(path)?.as_array()
    }

    pub fn get_map(&self, path: &str) -> Option<&Map<String, Value>> {
        self.get(path)?.as_object()
    }

    /// Read a map of string values, skipping non-string entries.
    pub fn get_string_map(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let map = self.get_map(path)?;
        Some(
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
        )
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub fn name(&self) -> Option<&str> {
        self.get_str("metadata.name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_str("metadata.namespace")
    }

    pub fn uid(&self) -> Option<&str> {
        self.get_str("metadata.uid")
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.get_str("metadata.resourceVersion")
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.get_map("metadata.labels")?.get(key)?.as_str()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.get_map("metadata.annotations")?.get(key)?.as_str()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.get_string_map("metadata.labels").unwrap_or_default()
    }

    /// Parsed `metadata.ownerReferences`. Entries without a kind or name
    /// are skipped.
    pub fn owner_references(&self) -> Vec<OwnerReference> {
        let Some(refs) = self.get_list("metadata.ownerReferences") else {
            return Vec::new();
        };
        refs.iter()
            .filter_map(|raw| {
                let owner = raw.as_object()?;
                Some(OwnerReference {
                    kind: owner.get("kind")?.as_str()?.to_string(),
                    name: owner.get("name")?.as_str()?.to_string(),
                    uid: owner
                        .get("uid")
                        .and_then(Value::as_str)
                        .filter(|uid| !uid.is_empty())
                        .map(str::to_string),
                })
            })
            .collect()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Set a value by dotted path, creating intermediate maps as needed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), DocumentError> {
        if path.is_empty() {
            return Err(DocumentError::EmptyPath);
        }
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments.split_last().ok_or(DocumentError::EmptyPath)?;

        let mut current = &mut self.0;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = entry
                .as_object_mut()
                .ok_or_else(|| DocumentError::NotAMap(segments[..=depth].join(".")))?;
        }
        current.insert(last.to_string(), value);
        Ok(())
    }

    /// Set a single annotation, creating `metadata.annotations` if absent.
    pub fn set_annotation(&mut self, key: &str, value: &str) -> Result<(), DocumentError> {
        let annotations = self.annotations_mut()?;
        annotations.insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn annotations_mut(&mut self) -> Result<&mut Map<String, Value>, DocumentError> {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| DocumentError::NotAMap("metadata".to_string()))?;
        metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| DocumentError::NotAMap("metadata.annotations".to_string()))
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

impl TryFrom<Value> for Document {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Document {
        Document::from_value(json!({
            "metadata": {
                "name": "d1",
                "namespace": "ns1",
                "uid": "uid-d1",
                "resourceVersion": "42",
                "labels": {"app": "web", "deployment.kubernetes.io/revision": "3"},
                "ownerReferences": [
                    {"kind": "Rollout", "name": "r1", "uid": ""},
                    {"kind": "Broken"}
                ]
            },
            "spec": {
                "paused": true,
                "replicas": 3,
                "template": {"spec": {"containers": [{"name": "app", "image": "web:v1"}]}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let doc = deployment();
        assert_eq!(doc.name(), Some("d1"));
        assert_eq!(doc.get_bool("spec.paused"), Some(true));
        assert_eq!(doc.get_i64("spec.replicas"), Some(3));
        assert_eq!(doc.get_list("spec.template.spec.containers").map(Vec::len), Some(1));
    }

    #[test]
    fn missing_and_mistyped_fields_are_not_found() {
        let doc = deployment();
        assert_eq!(doc.get_str("spec.strategy.type"), None);
        assert_eq!(doc.get_bool("spec.replicas"), None);
        assert_eq!(doc.get_list("spec.paused.deeper"), None);
    }

    #[test]
    fn labels_with_dots_go_through_map_helpers() {
        let doc = deployment();
        assert_eq!(doc.label("deployment.kubernetes.io/revision"), Some("3"));
        assert_eq!(doc.get_str("metadata.labels.app"), Some("web"));
    }

    #[test]
    fn owner_references_skip_incomplete_entries() {
        let owners = deployment().owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Rollout");
        assert_eq!(owners[0].uid, None);
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut doc = Document::new();
        doc.set("spec.template.metadata.labels", json!({"a": "b"}))
            .unwrap();
        assert_eq!(doc.get_str("spec.template.metadata.labels.a"), Some("b"));
    }

    #[test]
    fn set_refuses_to_overwrite_scalars_on_the_way() {
        let mut doc = deployment();
        let err = doc.set("spec.paused.value", json!(1)).unwrap_err();
        assert_eq!(err, DocumentError::NotAMap("spec.paused".to_string()));
    }

    #[test]
    fn set_annotation_preserves_existing_entries() {
        let mut doc = Document::from_value(json!({
            "metadata": {"annotations": {"keep": "me"}}
        }))
        .unwrap();
        doc.set_annotation("kruise.io/approved", "true").unwrap();
        assert_eq!(doc.annotation("keep"), Some("me"));
        assert_eq!(doc.annotation("kruise.io/approved"), Some("true"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert_eq!(
            Document::from_value(json!([1, 2])),
            Err(DocumentError::NotAnObject)
        );
    }
}
