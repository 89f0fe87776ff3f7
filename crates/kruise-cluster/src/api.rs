//! The cluster access contract.
//!
//! Every method takes a [`ResourceLocator`] and a namespace. An empty
//! namespace addresses all namespaces (or the cluster scope for
//! cluster-scoped resources such as namespaces).

use async_trait::async_trait;
use futures::stream::BoxStream;
use kruise_core::{Document, ResourceLocator};
use serde_json::Value;

use crate::error::ClusterResult;

/// Which objects a list or watch returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListQuery {
    All,
    /// Kubernetes label-selector dialect: `a=b,c in (d),!e`.
    Labels(String),
    /// A single object by name.
    Name(String),
}

impl ListQuery {
    /// Label query; an empty string selects everything.
    pub fn labels(query: impl Into<String>) -> Self {
        let query = query.into();
        if query.is_empty() {
            Self::All
        } else {
            Self::Labels(query)
        }
    }
}

/// Result of a list call: the items plus the collection resource version,
/// which is the cursor a subsequent watch resumes from.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<Document>,
    pub resource_version: String,
}

/// One change delivered by a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(Document),
    Modified(Document),
    Deleted(Document),
    /// The server reported a problem on the stream; the stream may continue.
    Error(String),
}

/// Stream of watch changes. The stream ending means the watch closed.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
    ) -> ClusterResult<ObjectList>;

    async fn get(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Document>;

    /// Full replacement of an existing object.
    async fn update(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        object: &Document,
    ) -> ClusterResult<Document>;

    /// JSON merge patch, optionally against a subresource (`scale`, `status`).
    async fn patch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
        patch: &Value,
        subresource: Option<&str>,
    ) -> ClusterResult<Document>;

    async fn delete(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<()>;

    /// Changes after `resource_version`. An empty version starts from now.
    async fn watch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
        resource_version: &str,
    ) -> ClusterResult<ChangeStream>;
}
