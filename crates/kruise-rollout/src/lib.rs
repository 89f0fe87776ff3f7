//! kruise-rollout — rollout reads, revision lineage and rollback.
//!
//! Rollouts are driven by the external orchestrator. This crate observes
//! them, reconstructs which pods belong to the stable and canary revisions
//! of the target workload, and applies the few mutations the dashboard
//! offers.
//!
//! # Components
//!
//! - **`revisions`** — Revision Reconciler (cohorts, readiness, ordering)
//! - **`rollback`** — Rollback Planner (stable ReplicaSet → workload template)
//! - **`actions`** — rollout merge-patch actions and container image updates
//! - **`service`** — `RolloutService`, the operations exposed over HTTP

pub mod actions;
pub mod revisions;
pub mod rollback;
pub mod service;

pub use actions::{ActionOutcome, RolloutAction, SetImageOutcome, SetImageRequest};
pub use revisions::{ContainerInfo, ContainerKind, RevisionCohort, RevisionMarks};
pub use rollback::RollbackOutcome;
pub use service::{DefaultRolloutList, RolloutList, RolloutPods, RolloutService};
