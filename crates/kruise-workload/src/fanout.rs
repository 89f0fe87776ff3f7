//! Bounded-deadline fan-out.
//!
//! Launch one task per key, give each its own timeout, and stop collecting
//! at an overall deadline. Whatever has not finished by then is reported
//! as pending and aborted. A partial answer is an ordinary result, not an
//! error.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

pub const DEFAULT_PER_TASK: Duration = Duration::from_secs(10);
pub const DEFAULT_OVERALL: Duration = Duration::from_secs(15);

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed(String),
    /// Exceeded its own timeout.
    TimedOut,
}

/// Results that arrived before the deadline, plus the keys that did not.
#[derive(Debug, Clone)]
pub struct Partial<K, T> {
    pub results: BTreeMap<K, TaskOutcome<T>>,
    /// In launch order.
    pub pending: Vec<K>,
}

impl<K, T> Partial<K, T> {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    pub per_task: Duration,
    pub overall: Duration,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            per_task: DEFAULT_PER_TASK,
            overall: DEFAULT_OVERALL,
        }
    }
}

impl FanOut {
    pub fn new(per_task: Duration, overall: Duration) -> Self {
        Self { per_task, overall }
    }

    /// Run `task` for every key concurrently. Panicking tasks count as
    /// failed. Tasks still running at the overall deadline are aborted.
    pub async fn gather<K, T, E, F, Fut>(&self, keys: impl IntoIterator<Item = K>, task: F) -> Partial<K, T>
    where
        K: Ord + Clone + Send + 'static,
        T: Send + 'static,
        E: Display,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let deadline = Instant::now() + self.overall;
        let per_task = self.per_task;
        let mut tasks = JoinSet::new();
        let mut keys_by_id = HashMap::new();
        let mut launched = Vec::new();

        for key in keys {
            let work = task(key.clone());
            let handle = tasks.spawn(async move {
                match time::timeout(per_task, work).await {
                    Ok(Ok(value)) => TaskOutcome::Done(value),
                    Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                    Err(_) => TaskOutcome::TimedOut,
                }
            });
            keys_by_id.insert(handle.id(), key.clone());
            launched.push(key);
        }

        let mut results = BTreeMap::new();
        loop {
            match time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Err(_) => {
                    warn!(
                        unfinished = keys_by_id.len(),
                        overall_ms = self.overall.as_millis() as u64,
                        "fan-out deadline reached; returning partial results"
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok((id, outcome)))) => {
                    if let Some(key) = keys_by_id.remove(&id) {
                        results.insert(key, outcome);
                    }
                }
                Ok(Some(Err(e))) => {
                    if let Some(key) = keys_by_id.remove(&e.id()) {
                        results.insert(key, TaskOutcome::Failed(format!("task failed: {e}")));
                    }
                }
            }
        }
        tasks.abort_all();

        let pending: Vec<K> = launched
            .into_iter()
            .filter(|key| !results.contains_key(key))
            .collect();
        debug!(done = results.len(), pending = pending.len(), "fan-out collected");
        Partial { results, pending }
    }
}
