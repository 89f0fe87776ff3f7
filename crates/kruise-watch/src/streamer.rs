//! Watch Streamer.
//!
//! `INIT` lists the scope and opens a watch at the list's resource
//! version; either failing means the stream is unavailable and nothing is
//! emitted. A [`WatchSession`] then emits the snapshot and multiplexes
//! watch changes, a heartbeat timer and receiver cancellation. The cursor
//! only moves to resource versions carried by observed objects.
//!
//! There is no server-side reconnect: when the watch channel closes the
//! session emits one terminal error event and ends.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kruise_cluster::{ChangeEvent, ChangeStream, ClusterApi, ListQuery};
use kruise_core::registry::ROLLOUTS;
use kruise_core::{DashError, DashResult, Document};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::event::{WatchEvent, WatchEventKind};

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);
pub const CLOSED_MESSAGE: &str = "watch stream closed";
const EVENT_BUFFER: usize = 64;

/// Which rollouts a stream covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchScope {
    pub namespace: String,
    /// Restrict to a single rollout by exact name.
    pub name: Option<String>,
}

impl WatchScope {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: None,
        }
    }

    pub fn rollout(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: Some(name.into()),
        }
    }

    fn query(&self) -> ListQuery {
        match &self.name {
            Some(name) => ListQuery::Name(name.clone()),
            None => ListQuery::All,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub heartbeat: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Opens rollout feeds against an injected cluster client.
#[derive(Clone)]
pub struct RolloutWatcher {
    cluster: Arc<dyn ClusterApi>,
    settings: WatchSettings,
}

impl RolloutWatcher {
    pub fn new(cluster: Arc<dyn ClusterApi>, settings: WatchSettings) -> Self {
        Self { cluster, settings }
    }

    /// List the scope and open a watch from the list's resource version.
    pub async fn open(&self, scope: WatchScope) -> DashResult<WatchSession> {
        let query = scope.query();
        let list = self
            .cluster
            .list(&ROLLOUTS, &scope.namespace, &query)
            .await
            .map_err(|e| unavailable(&scope, "list", e))?;
        let changes = self
            .cluster
            .watch(&ROLLOUTS, &scope.namespace, &query, &list.resource_version)
            .await
            .map_err(|e| unavailable(&scope, "watch", e))?;

        debug!(
            namespace = %scope.namespace,
            name = scope.name.as_deref().unwrap_or_default(),
            items = list.items.len(),
            cursor = %list.resource_version,
            "rollout watch opened"
        );
        Ok(WatchSession {
            scope,
            snapshot: list.items,
            cursor: list.resource_version,
            changes,
            heartbeat: self.settings.heartbeat,
        })
    }
}

fn unavailable(scope: &WatchScope, operation: &str, error: impl std::fmt::Display) -> DashError {
    warn!(
        namespace = %scope.namespace,
        name = scope.name.as_deref().unwrap_or_default(),
        operation,
        error = %error,
        "rollout watch unavailable"
    );
    DashError::StreamUnavailable(error.to_string())
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The receiver was dropped (client disconnect). Nothing more was sent.
    ClientGone,
    /// The watch channel closed; a terminal error event was sent.
    WatchClosed,
}

/// An opened feed, ready to run.
pub struct WatchSession {
    scope: WatchScope,
    snapshot: Vec<Document>,
    cursor: String,
    changes: ChangeStream,
    heartbeat: Duration,
}

impl WatchSession {
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Run on a new task, returning the receiving end of the feed.
    pub fn spawn(self) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.run(tx));
        rx
    }

    /// Emit the snapshot, then stream until the watch closes or `sink`'s
    /// receiver goes away. The watch is dropped on return.
    pub async fn run(mut self, sink: mpsc::Sender<WatchEvent>) -> SessionEnd {
        let snapshot = std::mem::take(&mut self.snapshot);
        for rollout in snapshot {
            let event = self.object_event(WatchEventKind::Snapshot, rollout);
            if sink.send(event).await.is_err() {
                return self.client_gone();
            }
        }

        let mut heartbeat = time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                biased;
                _ = sink.closed() => return self.client_gone(),
                change = self.changes.next() => match change {
                    Some(change) => self.on_change(change),
                    None => {
                        info!(namespace = %self.scope.namespace, cursor = %self.cursor, "rollout watch closed");
                        let closed = self.bare_event(WatchEventKind::Error, Some(CLOSED_MESSAGE.to_string()));
                        let _ = sink.send(closed).await;
                        return SessionEnd::WatchClosed;
                    }
                },
                _ = heartbeat.tick() => self.bare_event(WatchEventKind::Heartbeat, None),
            };
            if sink.send(event).await.is_err() {
                return self.client_gone();
            }
        }
    }

    fn on_change(&mut self, change: ChangeEvent) -> WatchEvent {
        match change {
            ChangeEvent::Added(rollout) | ChangeEvent::Modified(rollout) => {
                self.advance(&rollout);
                self.object_event(WatchEventKind::Upsert, rollout)
            }
            ChangeEvent::Deleted(rollout) => {
                self.advance(&rollout);
                self.object_event(WatchEventKind::Delete, rollout)
            }
            ChangeEvent::Error(message) => {
                warn!(namespace = %self.scope.namespace, %message, "rollout watch reported an error");
                self.bare_event(WatchEventKind::Error, Some(message))
            }
        }
    }

    fn advance(&mut self, rollout: &Document) {
        if let Some(version) = rollout.resource_version().filter(|v| !v.is_empty()) {
            self.cursor = version.to_string();
        }
    }

    fn object_event(&self, kind: WatchEventKind, rollout: Document) -> WatchEvent {
        WatchEvent::object(
            kind,
            rollout,
            &self.scope.namespace,
            self.scope.name.as_deref(),
            &self.cursor,
        )
    }

    fn bare_event(&self, kind: WatchEventKind, message: Option<String>) -> WatchEvent {
        WatchEvent::bare(
            kind,
            &self.scope.namespace,
            self.scope.name.as_deref(),
            &self.cursor,
            message,
        )
    }

    fn client_gone(&self) -> SessionEnd {
        debug!(namespace = %self.scope.namespace, "rollout watch client disconnected");
        SessionEnd::ClientGone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kruise_cluster::{InMemoryCluster, Operation};
    use serde_json::{Value, json};

    fn rollout(name: &str, phase: &str) -> Document {
        Document::from_value(json!({
            "metadata": {"name": name, "namespace": "ns1"},
            "status": {"phase": phase}
        }))
        .unwrap()
    }

    fn watcher(cluster: &InMemoryCluster) -> RolloutWatcher {
        RolloutWatcher::new(Arc::new(cluster.clone()), WatchSettings::default())
    }

    fn phase(event: &WatchEvent) -> Option<&str> {
        event.payload.rollout.as_ref()?.get_str("status.phase")
    }

    #[tokio::test]
    async fn failed_list_or_watch_is_stream_unavailable() {
        let cluster = InMemoryCluster::new();
        cluster.fail(Operation::List, ROLLOUTS, "apiserver down");
        let err = watcher(&cluster).open(WatchScope::namespace("ns1")).await.err().unwrap();
        assert_eq!(err.code(), "WATCH_STREAM_UNAVAILABLE");

        cluster.clear_failures();
        cluster.fail(Operation::Watch, ROLLOUTS, "watch refused");
        let err = watcher(&cluster).open(WatchScope::namespace("ns1")).await.err().unwrap();
        assert_eq!(err.code(), "WATCH_STREAM_UNAVAILABLE");
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_then_changes_in_order() {
        let cluster = InMemoryCluster::new();
        cluster.apply(ROLLOUTS, rollout("r1", "Progressing")).unwrap();
        cluster.apply(ROLLOUTS, rollout("r2", "Healthy")).unwrap();

        let session = watcher(&cluster).open(WatchScope::namespace("ns1")).await.unwrap();
        assert_eq!(session.cursor(), "2");
        let mut feed = session.spawn();

        for expected in ["r1", "r2"] {
            let event = feed.recv().await.unwrap();
            assert_eq!(event.kind, WatchEventKind::Snapshot);
            assert_eq!(event.payload.name, expected);
            assert_eq!(event.payload.resource_version, "2");
        }

        cluster.apply(ROLLOUTS, rollout("r1", "Paused")).unwrap();
        cluster.remove(ROLLOUTS, "ns1", "r2").unwrap();

        let upsert = feed.recv().await.unwrap();
        assert_eq!(upsert.kind, WatchEventKind::Upsert);
        assert_eq!(phase(&upsert), Some("Paused"));
        assert_eq!(upsert.payload.resource_version, "3");

        let delete = feed.recv().await.unwrap();
        assert_eq!(delete.kind, WatchEventKind::Delete);
        assert_eq!(delete.payload.name, "r2");
        assert_eq!(delete.payload.resource_version, "4");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_carry_the_cursor_without_payload() {
        let cluster = InMemoryCluster::new();
        cluster.apply(ROLLOUTS, rollout("r1", "Progressing")).unwrap();
        let mut feed = watcher(&cluster)
            .open(WatchScope::namespace("ns1"))
            .await
            .unwrap()
            .spawn();
        assert_eq!(feed.recv().await.unwrap().kind, WatchEventKind::Snapshot);

        let started = Instant::now();
        let heartbeat = feed.recv().await.unwrap();
        assert_eq!(heartbeat.kind, WatchEventKind::Heartbeat);
        assert!(heartbeat.payload.rollout.is_none());
        assert_eq!(heartbeat.payload.resource_version, "1");
        assert!(started.elapsed() >= DEFAULT_HEARTBEAT);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_keep_the_stream_open() {
        let cluster = InMemoryCluster::new();
        let mut feed = watcher(&cluster)
            .open(WatchScope::namespace("ns1"))
            .await
            .unwrap()
            .spawn();

        cluster.inject_watch_error(ROLLOUTS, "too old resource version");
        let error = feed.recv().await.unwrap();
        assert_eq!(error.kind, WatchEventKind::Error);
        assert_eq!(error.payload.message.as_deref(), Some("too old resource version"));

        cluster.apply(ROLLOUTS, rollout("r1", "Progressing")).unwrap();
        assert_eq!(feed.recv().await.unwrap().kind, WatchEventKind::Upsert);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_watch_emits_exactly_one_terminal_error() {
        let cluster = InMemoryCluster::new();
        let session = watcher(&cluster).open(WatchScope::namespace("ns1")).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(session.run(tx));

        cluster.close_watches();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Error);
        assert_eq!(event.payload.message.as_deref(), Some(CLOSED_MESSAGE));
        assert!(rx.recv().await.is_none());
        assert_eq!(task.await.unwrap(), SessionEnd::WatchClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_receiver_ends_the_session_silently() {
        let cluster = InMemoryCluster::new();
        let session = watcher(&cluster).open(WatchScope::namespace("ns1")).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(session.run(tx));

        drop(rx);
        assert_eq!(task.await.unwrap(), SessionEnd::ClientGone);
    }

    #[tokio::test(start_paused = true)]
    async fn single_rollout_scope_filters_by_name() {
        let cluster = InMemoryCluster::new();
        cluster.apply(ROLLOUTS, rollout("r1", "Progressing")).unwrap();
        cluster.apply(ROLLOUTS, rollout("r2", "Progressing")).unwrap();
        let mut feed = watcher(&cluster)
            .open(WatchScope::rollout("ns1", "r2"))
            .await
            .unwrap()
            .spawn();

        let snapshot = feed.recv().await.unwrap();
        assert_eq!(snapshot.payload.name, "r2");

        cluster.apply(ROLLOUTS, rollout("r1", "Paused")).unwrap();
        cluster.apply(ROLLOUTS, rollout("r2", "Paused")).unwrap();
        let upsert = feed.recv().await.unwrap();
        assert_eq!(upsert.payload.name, "r2");
        let payload: Value = serde_json::to_value(&upsert.payload).unwrap();
        assert_eq!(payload["rollout"]["status"]["phase"], "Paused");
    }
}
