//! Background spatial processing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use common_exception::{SpatialError, SpatialResult};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::locks::KeyedLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

pub type Job = BoxFuture<'static, SpatialResult<()>>;

/// A queue that runs at most one job per key at a time and reports job
/// status by key.
pub trait AsyncTask: fmt::Debug + Send + Sync {
    fn enqueue(&self, key: &str, job: Job, priority: i32) -> TaskHandle;

    /// `None` when nothing was ever queued under `key`.
    fn status_of(&self, key: &str) -> Option<TaskStatus>;

    /// Jobs under `key` that are queued or running.
    fn pending_jobs(&self, key: &str) -> usize;

    fn statuses_with_prefix(&self, prefix: &str) -> BTreeMap<String, TaskStatus>;

    /// Message of the most recent failure under `key`.
    fn last_error(&self, key: &str) -> Option<String>;
}

/// Completion handle of a queued job.
#[derive(Debug)]
pub struct TaskHandle {
    key: String,
    join: JoinHandle<SpatialResult<()>>,
}

impl TaskHandle {
    pub fn new(key: impl Into<String>, join: JoinHandle<SpatialResult<()>>) -> Self {
        Self {
            key: key.into(),
            join,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn join(self) -> SpatialResult<()> {
        self.join.await.map_err(SpatialError::task)?
    }
}

#[derive(Debug, Clone)]
struct TaskEntry {
    status: TaskStatus,
    priority: i32,
    pending: usize,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    locks: KeyedLocks,
    entries: Mutex<BTreeMap<String, TaskEntry>>,
}

impl QueueState {
    fn set_status(&self, key: &str, status: TaskStatus) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.status = status;
        }
    }

    /// Records the end of one job. The key stays queued while another job
    /// is waiting behind it.
    fn finish(&self, key: &str, result: &SpatialResult<()>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.pending = entry.pending.saturating_sub(1);
        if let Err(e) = result {
            entry.last_error = Some(e.to_string());
        }
        entry.status = match result {
            _ if entry.pending > 0 => TaskStatus::Queued,
            Ok(()) => TaskStatus::Success,
            Err(_) => TaskStatus::Failure,
        };
    }
}

/// [`AsyncTask`] on the tokio runtime. Jobs sharing a key wait for each other
/// in arrival order; the priority is recorded but does not reorder jobs.
#[derive(Debug, Clone, Default)]
pub struct InProcessTaskQueue {
    state: Arc<QueueState>,
}

impl InProcessTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority_of(&self, key: &str) -> Option<i32> {
        self.state.entries.lock().get(key).map(|entry| entry.priority)
    }
}

impl AsyncTask for InProcessTaskQueue {
    fn enqueue(&self, key: &str, job: Job, priority: i32) -> TaskHandle {
        self.state
            .entries
            .lock()
            .entry(key.to_owned())
            .and_modify(|entry| {
                entry.status = TaskStatus::Queued;
                entry.priority = priority;
                entry.pending += 1;
            })
            .or_insert(TaskEntry {
                status: TaskStatus::Queued,
                priority,
                pending: 1,
                last_error: None,
            });

        let state = self.state.clone();
        let task_key = key.to_owned();
        let join = tokio::spawn(async move {
            let _guard = state.locks.lock(&task_key).await;
            state.set_status(&task_key, TaskStatus::Processing);
            debug!("processing {task_key}");

            let result = job.await;
            if let Err(e) = &result {
                warn!("task {task_key} failed: {e}");
            }
            state.finish(&task_key, &result);
            result
        });

        TaskHandle::new(key, join)
    }

    fn status_of(&self, key: &str) -> Option<TaskStatus> {
        self.state.entries.lock().get(key).map(|entry| entry.status)
    }

    fn pending_jobs(&self, key: &str) -> usize {
        self.state
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.pending)
    }

    fn statuses_with_prefix(&self, prefix: &str) -> BTreeMap<String, TaskStatus> {
        self.state
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.status))
            .collect()
    }

    fn last_error(&self, key: &str) -> Option<String> {
        self.state
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.last_error.clone())
    }
}
