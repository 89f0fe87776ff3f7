//! kruise-core — shared building blocks for the Kruise dashboard backend.
//!
//! Cluster objects are handled as schema-less [`Document`]s so that new or
//! evolving resource kinds need no code changes. Everything that depends
//! on a kind string goes through the [`registry`].
//!
//! # Components
//!
//! - **`document`** — dynamic document with dotted-path accessors
//! - **`registry`** — Workload Type Registry and resource locators
//! - **`selector`** — label-query derivation from workload selectors
//! - **`ownership`** — owner-reference matching
//! - **`rollout`** — typed reads over rollout documents
//! - **`error`** — error taxonomy shared by every service

pub mod document;
pub mod error;
pub mod ownership;
pub mod registry;
pub mod rollout;
pub mod selector;

pub use document::{Document, DocumentError, OwnerReference};
pub use ownership::OwnerKey;
pub use error::{DashError, DashResult};
pub use registry::{ResourceLocator, Revisioning, WorkloadType};
pub use rollout::{RolloutView, WorkloadRef};
