//! kruise-workload — workload operations over the registry.
//!
//! Every kind string is resolved through the Workload Type Registry; the
//! registry's capability flags decide whether scale and restart are
//! allowed. The namespace overview lists every OpenKruise kind at once and
//! answers with whatever arrived before the deadline.
//!
//! # Components
//!
//! - **`fanout`** — concurrent tasks with per-task and overall deadlines
//! - **`ops`** — `WorkloadService` (get, list, pods, scale, restart, delete, overview)

pub mod fanout;
pub mod ops;

pub use fanout::{FanOut, Partial, TaskOutcome};
pub use ops::{OpOutcome, ScaleOutcome, WorkloadList, WorkloadOverview, WorkloadPods, WorkloadService};
