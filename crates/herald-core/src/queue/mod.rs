//! Queue module: task status, retry policy, and the in-memory dispatch queue.

mod memory;
mod retry;
mod state;

pub use memory::InMemoryDispatchQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use state::TaskStatus;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is full (capacity={capacity})")]
    Full { capacity: usize },

    #[error("task cannot be enqueued from status {status:?}")]
    NotEnqueueable { status: TaskStatus },
}

/// A task the queue refused, handed back to the caller untouched.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EnqueueRejected {
    pub error: QueueError,
    pub task: Task,
}

/// Dispatch queue port.
///
/// Design intent:
/// - Strict FIFO; retried tasks are enqueued again at the tail.
/// - Every operation is atomic with respect to concurrent callers.
/// - `enqueue` never waits. A bounded implementation rejects instead.
/// - A dequeued task belongs to the caller; the queue keeps no reference.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Assign an id if missing, mark Pending, stamp times, append to the tail.
    fn enqueue(&self, task: Task) -> Result<TaskId, EnqueueRejected>;

    /// Wait until a task is available, remove it and mark it Processing.
    async fn dequeue(&self) -> Task;

    /// Remove the head if there is one, without waiting.
    fn try_dequeue(&self) -> Option<Task>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of pending tasks; `usize::MAX` when unbounded.
    fn capacity_hint(&self) -> usize;

    /// Drop every pending task and return how many were removed.
    /// Tasks already dequeued are unaffected.
    fn clear(&self) -> usize;

    /// Copy of the pending tasks, head first.
    fn snapshot(&self) -> Vec<Task>;

    fn stats_line(&self) -> String {
        format!(
            "Queue Stats - Size: {}, Capacity: {}, Empty: {}",
            self.len(),
            self.capacity_hint(),
            self.is_empty()
        )
    }
}
