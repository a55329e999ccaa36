//! Deliverer port - 実際の配送（メール送信など）
//!
//! The worker loop hands each dequeued task to a `Deliverer`. Transport
//! details live behind this trait.

use async_trait::async_trait;

use crate::domain::{DeliveryError, Task, TaskKind};

/// Performs the side effect a task describes.
///
/// - `Ok(())`: delivered, the task becomes Sent.
/// - `Err(e)` with a transient kind: the task is retried.
/// - `Err(e)` with a permanent kind: the task fails without retry.
///
/// Panics are caught by the caller and treated as transient failures.
/// With more than one worker configured the deliverer is called concurrently.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Kinds this deliverer has no branch for fail permanently without a call
    /// to `deliver`.
    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }

    async fn deliver(&self, task: &Task) -> Result<(), DeliveryError>;
}
