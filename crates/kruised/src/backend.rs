//! Cluster backend selection.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use kruise_cluster::{ClusterApi, InMemoryCluster, KubeCluster};
use kruise_core::Document;
use serde_json::Value;
use tracing::info;

use crate::config::{Backend, ClusterConfig};

/// Build the one cluster client every service shares.
pub async fn connect(config: &ClusterConfig) -> anyhow::Result<Arc<dyn ClusterApi>> {
    match config.backend {
        Backend::Kube => {
            let cluster = KubeCluster::connect().await.context("connecting to the cluster")?;
            info!("using kube cluster backend");
            Ok(Arc::new(cluster))
        }
        Backend::Memory => {
            let cluster = InMemoryCluster::new();
            if let Some(path) = &config.seed {
                let objects = load_seed(path)?;
                let count = cluster.seed(objects)?;
                info!(path = %path.display(), objects = count, "memory cluster seeded");
            }
            info!("using in-memory cluster backend");
            Ok(Arc::new(cluster))
        }
    }
}

/// Objects from a seed file: a JSON array, or a list object with `items`.
pub fn load_seed(path: &Path) -> anyhow::Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("parsing seed {}", path.display()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut list) => match list.remove("items") {
            Some(Value::Array(items)) => items,
            _ => bail!("seed {} has no items array", path.display()),
        },
        _ => bail!("seed {} must be a JSON array or list object", path.display()),
    };
    items
        .into_iter()
        .map(|item| Document::from_value(item).context("seed items must be objects"))
        .collect()
}
