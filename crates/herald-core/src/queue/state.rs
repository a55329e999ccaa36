//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Processing -> Sent
/// - Pending -> Processing -> Retry -> Pending (loop while retry_count <= max_retries)
/// - Pending -> Processing -> Failed (retries exhausted, or permanent error)
/// - Retry -> Failed (the queue refused the retry)
///
/// Sent and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,

    /// Dequeued and owned by a worker.
    Processing,

    /// Delivered.
    Sent,

    /// Failed, about to go back to the tail of the queue.
    Retry,

    /// Failed permanently.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Sent | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Sent)
                | (Processing, Retry)
                | (Processing, Failed)
                | (Retry, Pending)
                | (Retry, Failed)
        )
    }
}
