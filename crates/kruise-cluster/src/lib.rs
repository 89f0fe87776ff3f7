//! kruise-cluster — access to the cluster API.
//!
//! Services never hold a global client. They receive an
//! `Arc<dyn ClusterApi>` at construction, which is either the
//! [`KubeCluster`] adapter (a live cluster) or the [`InMemoryCluster`]
//! (tests and offline demo mode).
//!
//! # Components
//!
//! - **`api`** — the `ClusterApi` contract: list, get, update, patch, delete, watch
//! - **`memory`** — in-memory cluster with resource versions, watch replay, failure injection
//! - **`kubernetes`** — adapter over a `kube::Client` using dynamic objects
//! - **`error`** — cluster error type and its mapping into `DashError`

pub mod api;
pub mod error;
pub mod kubernetes;
pub mod memory;

pub use api::{ChangeEvent, ChangeStream, ClusterApi, ListQuery, ObjectList};
pub use error::{ClusterError, ClusterResult};
pub use kubernetes::KubeCluster;
pub use memory::{InMemoryCluster, Operation};
