//! kruise-watch — push feed of rollout changes.
//!
//! Turns a list + watch against the cluster into a stream of wire events:
//! a snapshot of every matching rollout, then upserts and deletes as they
//! happen, with periodic heartbeats carrying the current cursor. One task
//! drives each open stream; streams share nothing.
//!
//! # Components
//!
//! - **`event`** — wire event kinds and the payload schema
//! - **`streamer`** — `RolloutWatcher` (open) and `WatchSession` (run)

pub mod event;
pub mod streamer;

pub use event::{WatchEvent, WatchEventKind, WatchPayload};
pub use streamer::{RolloutWatcher, SessionEnd, WatchScope, WatchSession, WatchSettings};
