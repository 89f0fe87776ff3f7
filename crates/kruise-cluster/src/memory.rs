//! In-memory cluster.
//!
//! Behaves like a small API server: every write bumps a global resource
//! version, lists report the version they were taken at, and watches
//! replay recorded changes after a cursor before following live changes.
//! Only the most recent changes are kept; a watch resuming from an older
//! cursor gets a "too old resource version" error, as from an API server.
//! Used by the test suites and by `kruised` in offline demo mode.
//!
//! Failures can be injected per operation and resource, watch streams can
//! be fed error events or closed, which is what the watch streamer and the
//! fan-out tests rely on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use kruise_core::registry::locator_for_kind;
use kruise_core::{Document, ResourceLocator};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use crate::api::{ChangeEvent, ChangeStream, ClusterApi, ListQuery, ObjectList};
use crate::error::{ClusterError, ClusterResult};

const WATCH_BUFFER: usize = 256;
/// Changes kept for watch replay.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;
const DEFAULT_NAMESPACE: &str = "default";

/// Cluster operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Update,
    Patch,
    Delete,
    Watch,
}

type ObjectKey = (ResourceLocator, String, String);

#[derive(Debug, Clone)]
struct Change {
    locator: ResourceLocator,
    namespace: String,
    version: u64,
    event: ChangeEvent,
}

struct State {
    objects: BTreeMap<ObjectKey, Document>,
    version: u64,
    history: VecDeque<Change>,
    history_limit: usize,
    /// Version of the newest change dropped from `history`.
    compacted: u64,
    failures: HashMap<(Operation, ResourceLocator), String>,
    changes: broadcast::Sender<Change>,
}

impl State {
    fn check(&self, operation: Operation, locator: &ResourceLocator) -> ClusterResult<()> {
        match self.failures.get(&(operation, *locator)) {
            Some(message) => Err(ClusterError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    fn publish(&mut self, locator: ResourceLocator, namespace: &str, event: ChangeEvent) {
        let change = Change {
            locator,
            namespace: namespace.to_string(),
            version: self.version,
            event,
        };
        self.history.push_back(change.clone());
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.version;
            }
        }
        // No subscribers is not an error.
        let _ = self.changes.send(change);
    }

    fn upsert(
        &mut self,
        locator: ResourceLocator,
        namespace: &str,
        mut object: Document,
    ) -> ClusterResult<Document> {
        let name = object
            .name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClusterError::Decode("object has no metadata.name".into()))?
            .to_string();
        self.version += 1;
        object.set(
            "metadata.resourceVersion",
            Value::String(self.version.to_string()),
        )?;
        if locator.namespaced {
            object.set("metadata.namespace", Value::String(namespace.to_string()))?;
        }

        let key = (locator, namespace.to_string(), name);
        let event = match self.objects.insert(key, object.clone()) {
            Some(_) => ChangeEvent::Modified(object.clone()),
            None => ChangeEvent::Added(object.clone()),
        };
        self.publish(locator, namespace, event);
        Ok(object)
    }

    fn remove(
        &mut self,
        locator: ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<Document>> {
        let key = (locator, namespace.to_string(), name.to_string());
        let Some(mut object) = self.objects.remove(&key) else {
            return Ok(None);
        };
        self.version += 1;
        object.set(
            "metadata.resourceVersion",
            Value::String(self.version.to_string()),
        )?;
        self.publish(locator, namespace, ChangeEvent::Deleted(object.clone()));
        Ok(Some(object))
    }

    fn stored(&self, locator: &ResourceLocator, namespace: &str, name: &str) -> ClusterResult<&Document> {
        self.objects
            .get(&(*locator, namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found(locator, name))
    }
}

/// In-memory cluster. Clones share the same state.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` changes for watch replay.
    pub fn with_history_limit(limit: usize) -> Self {
        let (changes, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Arc::new(Mutex::new(State {
                objects: BTreeMap::new(),
                version: 0,
                history: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
                history_limit: limit,
                compacted: 0,
                failures: HashMap::new(),
                changes,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace an object, ignoring injected failures.
    /// Namespaced objects without a namespace land in `default`.
    pub fn apply(&self, locator: ResourceLocator, object: Document) -> ClusterResult<Document> {
        let namespace = scope(&locator, object.namespace().unwrap_or(DEFAULT_NAMESPACE)).to_string();
        self.lock().upsert(locator, &namespace, object)
    }

    /// Delete an object, ignoring injected failures.
    pub fn remove(
        &self,
        locator: ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<Document>> {
        self.lock().remove(locator, scope(&locator, namespace), name)
    }

    /// Apply documents that carry a top-level `kind`.
    pub fn seed(&self, objects: impl IntoIterator<Item = Document>) -> ClusterResult<usize> {
        let mut count = 0;
        for object in objects {
            let kind = object.get_str("kind").unwrap_or_default();
            let locator = locator_for_kind(kind)
                .ok_or_else(|| ClusterError::Decode(format!("cannot seed object of kind {kind:?}")))?;
            self.apply(locator, object)?;
            count += 1;
        }
        debug!(count, "seeded in-memory cluster");
        Ok(count)
    }

    /// Snapshot of a stored object.
    pub fn object(&self, locator: ResourceLocator, namespace: &str, name: &str) -> Option<Document> {
        self.lock()
            .stored(&locator, scope(&locator, namespace), name)
            .ok()
            .cloned()
    }

    /// Make `operation` on `locator` fail with a transport error until cleared.
    pub fn fail(&self, operation: Operation, locator: ResourceLocator, message: impl Into<String>) {
        self.lock()
            .failures
            .insert((operation, locator), message.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Deliver an error event to every open watch on `locator`.
    pub fn inject_watch_error(&self, locator: ResourceLocator, message: impl Into<String>) {
        let state = self.lock();
        let change = Change {
            locator,
            namespace: String::new(),
            version: state.version,
            event: ChangeEvent::Error(message.into()),
        };
        let _ = state.changes.send(change);
    }

    /// End every open watch stream. Later watches work normally.
    pub fn close_watches(&self) {
        let (changes, _) = broadcast::channel(WATCH_BUFFER);
        self.lock().changes = changes;
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
    ) -> ClusterResult<ObjectList> {
        let state = self.lock();
        state.check(Operation::List, locator)?;
        let namespace = scope(locator, namespace);
        let items = state
            .objects
            .iter()
            .filter(|((l, ns, _), object)| {
                l == locator
                    && (namespace.is_empty() || ns == namespace)
                    && query_matches(query, object)
            })
            .map(|(_, object)| object.clone())
            .collect();
        Ok(ObjectList {
            items,
            resource_version: state.version.to_string(),
        })
    }

    async fn get(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Document> {
        let state = self.lock();
        state.check(Operation::Get, locator)?;
        state.stored(locator, scope(locator, namespace), name).cloned()
    }

    async fn update(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        object: &Document,
    ) -> ClusterResult<Document> {
        let mut state = self.lock();
        state.check(Operation::Update, locator)?;
        let namespace = scope(locator, namespace);
        let name = object.name().unwrap_or_default();
        let current = state.stored(locator, namespace, name)?;

        let submitted = object.resource_version().unwrap_or_default();
        if !submitted.is_empty() && Some(submitted) != current.resource_version() {
            return Err(ClusterError::Api {
                code: 409,
                message: format!(
                    "operation cannot be fulfilled on {} \"{name}\": the object has been modified",
                    locator.resource
                ),
            });
        }
        state.upsert(*locator, namespace, object.clone())
    }

    async fn patch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
        patch: &Value,
        subresource: Option<&str>,
    ) -> ClusterResult<Document> {
        let mut state = self.lock();
        state.check(Operation::Patch, locator)?;
        if let Some(sub) = subresource.filter(|sub| !matches!(*sub, "scale" | "status")) {
            return Err(ClusterError::Api {
                code: 404,
                message: format!("subresource {sub} not found on {}", locator.resource),
            });
        }
        let namespace = scope(locator, namespace);
        let mut merged = state.stored(locator, namespace, name)?.clone().into_value();
        merge_patch(&mut merged, patch);
        let object = Document::from_value(merged)?;
        state.upsert(*locator, namespace, object)
    }

    async fn delete(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<()> {
        let mut state = self.lock();
        state.check(Operation::Delete, locator)?;
        match state.remove(*locator, scope(locator, namespace), name)? {
            Some(_) => Ok(()),
            None => Err(not_found(locator, name)),
        }
    }

    async fn watch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
        resource_version: &str,
    ) -> ClusterResult<ChangeStream> {
        let state = self.lock();
        state.check(Operation::Watch, locator)?;
        let from = resource_version.parse::<u64>().unwrap_or(state.version);
        if from < state.compacted {
            debug!(from, compacted = state.compacted, "watch cursor expired");
            let expired = ChangeEvent::Error(format!(
                "too old resource version: {from} ({})",
                state.compacted
            ));
            return Ok(stream::iter([expired]).boxed());
        }
        let filter = WatchFilter {
            locator: *locator,
            namespace: scope(locator, namespace).to_string(),
            query: query.clone(),
        };

        let backlog: Vec<ChangeEvent> = state
            .history
            .iter()
            .filter(|change| change.version > from && filter.accepts(change))
            .map(|change| change.event.clone())
            .collect();
        // Subscribing under the lock: everything after the backlog is live.
        let live = BroadcastStream::new(state.changes.subscribe()).filter_map(move |received| {
            let event = match received {
                Ok(change) if filter.accepts(&change) => Some(change.event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    Some(ChangeEvent::Error(format!("watch lagged by {skipped} events")))
                }
            };
            futures::future::ready(event)
        });
        Ok(stream::iter(backlog).chain(live).boxed())
    }
}

struct WatchFilter {
    locator: ResourceLocator,
    namespace: String,
    query: ListQuery,
}

impl WatchFilter {
    fn accepts(&self, change: &Change) -> bool {
        if change.locator != self.locator {
            return false;
        }
        match &change.event {
            ChangeEvent::Error(_) => true,
            ChangeEvent::Added(object) | ChangeEvent::Modified(object) | ChangeEvent::Deleted(object) => {
                (self.namespace.is_empty() || change.namespace == self.namespace)
                    && query_matches(&self.query, object)
            }
        }
    }
}

fn scope<'a>(locator: &ResourceLocator, namespace: &'a str) -> &'a str {
    if locator.namespaced { namespace } else { "" }
}

fn not_found(locator: &ResourceLocator, name: &str) -> ClusterError {
    ClusterError::NotFound {
        resource: locator.resource.to_string(),
        name: name.to_string(),
    }
}

/// JSON merge patch: objects merge recursively, `null` removes a key,
/// anything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

// ── Label queries ──────────────────────────────────────────────

fn query_matches(query: &ListQuery, object: &Document) -> bool {
    match query {
        ListQuery::All => true,
        ListQuery::Name(name) => object.name() == Some(name.as_str()),
        ListQuery::Labels(query) => {
            let labels = object.labels();
            requirements(query)
                .into_iter()
                .all(|requirement| requirement_matches(requirement, &labels))
        }
    }
}

/// Split on commas outside parentheses.
fn requirements(query: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in query.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&query[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&query[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn requirement_matches(requirement: &str, labels: &BTreeMap<String, String>) -> bool {
    let value_of = |key: &str| labels.get(key.trim()).map(String::as_str);

    if let Some((key, values)) = requirement.split_once(" notin ") {
        return !value_of(key).is_some_and(|v| value_set(values).contains(&v));
    }
    if let Some((key, values)) = requirement.split_once(" in ") {
        return value_of(key).is_some_and(|v| value_set(values).contains(&v));
    }
    if let Some(key) = requirement.strip_prefix('!') {
        return value_of(key).is_none();
    }
    if let Some((key, value)) = requirement.split_once("!=") {
        return value_of(key) != Some(value.trim());
    }
    if let Some((key, value)) = requirement
        .split_once("==")
        .or_else(|| requirement.split_once('='))
    {
        return value_of(key) == Some(value.trim());
    }
    value_of(requirement).is_some()
}

fn value_set(raw: &str) -> Vec<&str> {
    raw.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}
