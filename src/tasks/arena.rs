//! Identity-keyed collection of in-flight tasks
//!
//! A task is spawned onto the runtime and recorded under a fresh id. When it
//! finishes it erases its own entry before delivering its result, which
//! happens exactly once. A task that panics or is aborted erases its entry
//! as well. The running task only holds a weak handle to the
//! arena; dropping the arena aborts whatever is still running, so no task
//! outlives its owner and no late completion is delivered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{WalletError, WalletResult};

pub type TaskId = u64;

pub struct TaskArena {
    state: Arc<ArenaState>,
}

struct ArenaState {
    kind: &'static str,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, AbortHandle>>,
}

impl ArenaState {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn erase(&self, id: TaskId) {
        self.lock().remove(&id);
        log::trace!("{} task {} finished", self.kind, id);
    }
}

/// Erases its task's entry when the task's future is dropped, however it ends
struct EraseOnDrop {
    arena: Weak<ArenaState>,
    id: TaskId,
}

impl Drop for EraseOnDrop {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.upgrade() {
            arena.erase(self.id);
        }
    }
}

/// Result of a spawned task
pub struct TaskCompletion<T> {
    rx: oneshot::Receiver<WalletResult<T>>,
}

impl<T> TaskCompletion<T> {
    pub async fn wait(self) -> WalletResult<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(WalletError::internal("task cancelled before completion")))
    }
}

impl TaskArena {
    pub fn new(kind: &'static str) -> Self {
        Self {
            state: Arc::new(ArenaState {
                kind,
                next_id: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Spawn `task` and track it until it completes
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T, F>(&self, task: F) -> TaskCompletion<T>
    where
        T: Send + 'static,
        F: Future<Output = WalletResult<T>> + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let guard = EraseOnDrop {
            arena: Arc::downgrade(&self.state),
            id,
        };

        // Held across spawn so the entry exists before the task can erase it
        let mut tasks = self.state.lock();
        let handle = tokio::spawn(async move {
            let result = task.await;
            drop(guard);
            // the caller may have stopped waiting
            let _ = tx.send(result);
        });
        tasks.insert(id, handle.abort_handle());
        log::trace!("{} task {} started", self.state.kind, id);

        TaskCompletion { rx }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskArena {
    fn drop(&mut self) {
        // aborted tasks erase themselves, so the lock is released first
        let pending: Vec<AbortHandle> = self.state.lock().drain().map(|(_, handle)| handle).collect();
        if !pending.is_empty() {
            log::debug!("Aborting {} pending {} task(s)", pending.len(), self.state.kind);
        }
        for handle in pending {
            handle.abort();
        }
    }
}
