//! Live cluster adapter over `kube`.
//!
//! All resources are accessed as `DynamicObject`s described by an
//! `ApiResource` built from the registry locator, so no generated type is
//! needed for OpenKruise kinds.

use async_trait::async_trait;
use futures::StreamExt;
use kruise_core::{Document, ResourceLocator};
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams,
};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ChangeEvent, ChangeStream, ClusterApi, ListQuery, ObjectList};
use crate::error::{ClusterError, ClusterResult};

/// Cluster access through a `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn connect() -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        debug!(default_namespace = client.default_namespace(), "connected to cluster");
        Ok(Self::new(client))
    }

    fn api(&self, locator: &ResourceLocator, namespace: &str) -> Api<DynamicObject> {
        let resource = api_resource(locator);
        if locator.namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        }
    }
}

fn api_resource(locator: &ResourceLocator) -> ApiResource {
    ApiResource {
        group: locator.group.to_string(),
        version: locator.version.to_string(),
        api_version: locator.api_version(),
        kind: locator.kind.to_string(),
        plural: locator.resource.to_string(),
    }
}

fn list_params(query: &ListQuery) -> ListParams {
    match query {
        ListQuery::All => ListParams::default(),
        ListQuery::Labels(labels) => ListParams::default().labels(labels),
        ListQuery::Name(name) => ListParams::default().fields(&format!("metadata.name={name}")),
    }
}

fn watch_params(query: &ListQuery) -> WatchParams {
    match query {
        ListQuery::All => WatchParams::default(),
        ListQuery::Labels(labels) => WatchParams::default().labels(labels),
        ListQuery::Name(name) => WatchParams::default().fields(&format!("metadata.name={name}")),
    }
}

fn to_document(object: DynamicObject) -> ClusterResult<Document> {
    let value = serde_json::to_value(object).map_err(|e| ClusterError::Decode(e.to_string()))?;
    Ok(Document::from_value(value)?)
}

fn from_document(document: &Document) -> ClusterResult<DynamicObject> {
    serde_json::from_value(document.clone().into_value())
        .map_err(|e| ClusterError::Decode(e.to_string()))
}

fn map_error(error: kube::Error, locator: &ResourceLocator, name: &str) -> ClusterError {
    match error {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            resource: locator.resource.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) => ClusterError::Api {
            code: response.code,
            message: response.message,
        },
        kube::Error::SerdeError(e) => ClusterError::Decode(e.to_string()),
        other => ClusterError::Transport(other.to_string()),
    }
}

fn convert_event(item: kube::Result<WatchEvent<DynamicObject>>) -> Option<ChangeEvent> {
    let change = match item {
        Ok(WatchEvent::Added(object)) => to_document(object).map(ChangeEvent::Added),
        Ok(WatchEvent::Modified(object)) => to_document(object).map(ChangeEvent::Modified),
        Ok(WatchEvent::Deleted(object)) => to_document(object).map(ChangeEvent::Deleted),
        Ok(WatchEvent::Bookmark(_)) => return None,
        Ok(WatchEvent::Error(response)) => Ok(ChangeEvent::Error(response.message)),
        Err(e) => Ok(ChangeEvent::Error(e.to_string())),
    };
    Some(change.unwrap_or_else(|e| {
        warn!(error = %e, "undecodable watch object");
        ChangeEvent::Error(e.to_string())
    }))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
    ) -> ClusterResult<ObjectList> {
        let list = self
            .api(locator, namespace)
            .list(&list_params(query))
            .await
            .map_err(|e| map_error(e, locator, ""))?;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        let items = list
            .items
            .into_iter()
            .map(to_document)
            .collect::<ClusterResult<Vec<_>>>()?;
        Ok(ObjectList {
            items,
            resource_version,
        })
    }

    async fn get(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Document> {
        let object = self
            .api(locator, namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, locator, name))?;
        to_document(object)
    }

    async fn update(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        object: &Document,
    ) -> ClusterResult<Document> {
        let name = object
            .name()
            .ok_or_else(|| ClusterError::Decode("object has no metadata.name".into()))?;
        let replaced = self
            .api(locator, namespace)
            .replace(name, &PostParams::default(), &from_document(object)?)
            .await
            .map_err(|e| map_error(e, locator, name))?;
        to_document(replaced)
    }

    async fn patch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
        patch: &Value,
        subresource: Option<&str>,
    ) -> ClusterResult<Document> {
        let api = self.api(locator, namespace);
        let params = PatchParams::default();
        let patch = Patch::Merge(patch);
        let patched = match subresource {
            Some(sub) => api.patch_subresource(sub, name, &params, &patch).await,
            None => api.patch(name, &params, &patch).await,
        }
        .map_err(|e| map_error(e, locator, name))?;
        to_document(patched)
    }

    async fn delete(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<()> {
        self.api(locator, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(e, locator, name))?;
        Ok(())
    }

    async fn watch(
        &self,
        locator: &ResourceLocator,
        namespace: &str,
        query: &ListQuery,
        resource_version: &str,
    ) -> ClusterResult<ChangeStream> {
        let stream = self
            .api(locator, namespace)
            .watch(&watch_params(query), resource_version)
            .await
            .map_err(|e| map_error(e, locator, ""))?;
        Ok(stream
            .filter_map(|item| futures::future::ready(convert_event(item)))
            .boxed())
    }
}
