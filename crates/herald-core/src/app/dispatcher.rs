//! Dispatcher - 投入口と管理用インターフェース
//!
//! Request-handling code calls [`Dispatcher::submit`]; admin endpoints call
//! `start` / `stop` / `clear` / `status`.
//!
//! Two explicit modes:
//! - [`DispatchMode::Queued`]: the task goes on the queue and `submit` returns
//!   without waiting on delivery. If the processor is not running and
//!   `fallback_when_stopped` is set, the task is delivered inline instead.
//! - [`DispatchMode::Direct`]: every submission is delivered inline, once.
//!
//! The returned [`Submission`] always says which path was taken.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::processor::{Processor, StartOutcome, StopOutcome};
use super::status::ProcessorStatus;
use super::worker_loop::WorkerContext;
use crate::domain::{DeliveryError, Task, TaskId};
use crate::observability::DeliveryCounts;
use crate::ports::{DispatchEvent, IdGenerator};
use crate::queue::{DispatchQueue, EnqueueRejected, QueueError, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Queued,
    Direct,
}

/// Result of a submission.
#[derive(Debug)]
pub enum Submission {
    /// On the queue; delivery happens in the background.
    Queued(TaskId),
    /// The queue refused the task.
    Rejected(EnqueueRejected),
    /// Delivered inline.
    Delivered(Task),
    /// Inline delivery failed. Inline delivery is not retried.
    DeliveryFailed { task: Task, error: DeliveryError },
}

impl Submission {
    /// Queued or delivered.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Queued(_) | Submission::Delivered(_))
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Submission::Delivered(_) | Submission::DeliveryFailed { .. }
        )
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Submission::Queued(id) => Some(id),
            Submission::Rejected(rejected) => rejected.task.id(),
            Submission::Delivered(task) | Submission::DeliveryFailed { task, .. } => task.id(),
        }
    }
}

pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
    processor: Processor,
    mode: DispatchMode,
    fallback_when_stopped: bool,
    id_generator: Arc<dyn IdGenerator>,
}

impl Dispatcher {
    pub(crate) fn from_parts(
        ctx: Arc<WorkerContext>,
        processor: Processor,
        mode: DispatchMode,
        fallback_when_stopped: bool,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            ctx,
            processor,
            mode,
            fallback_when_stopped,
            id_generator,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn queue(&self) -> &Arc<dyn DispatchQueue> {
        &self.ctx.queue
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Submit according to the configured mode.
    pub async fn submit(&self, task: Task) -> Submission {
        match self.mode {
            DispatchMode::Direct => self.deliver_now(task).await,
            DispatchMode::Queued => {
                if self.fallback_when_stopped && !self.processor.is_running() {
                    tracing::warn!(
                        task_id = task.log_id(),
                        "processor is not running, delivering inline"
                    );
                    self.deliver_now(task).await
                } else {
                    self.submit_queued(task)
                }
            }
        }
    }

    /// Put the task on the queue. Never waits, whatever the mode.
    pub fn submit_queued(&self, task: Task) -> Submission {
        match self.ctx.queue.enqueue(task) {
            Ok(task_id) => {
                self.ctx.stats.record_enqueued();
                Submission::Queued(task_id)
            }
            Err(rejected) => {
                self.ctx.stats.record_rejected();
                Submission::Rejected(rejected)
            }
        }
    }

    /// Deliver inline, one attempt, and wait for the result.
    /// Only Pending tasks are accepted, the same as for the queue.
    pub async fn deliver_now(&self, mut task: Task) -> Submission {
        if task.status() != TaskStatus::Pending {
            self.ctx.stats.record_rejected();
            let error = QueueError::NotEnqueueable {
                status: task.status(),
            };
            tracing::warn!(task_id = task.log_id(), %error, "refusing inline delivery");
            return Submission::Rejected(EnqueueRejected { error, task });
        }
        task.assign_id_if_missing(|| self.id_generator.generate_task_id());
        match self.ctx.deliver_once(task).await {
            Ok(task) => Submission::Delivered(task),
            Err((task, error)) => Submission::DeliveryFailed { task, error },
        }
    }

    pub fn start(&self) -> StartOutcome {
        self.processor.start()
    }

    pub async fn stop(&self) -> StopOutcome {
        self.processor.stop().await
    }

    /// Drop all pending tasks. In-flight deliveries are not affected.
    pub fn clear(&self) -> usize {
        let count = self.ctx.queue.clear();
        self.ctx.emit(DispatchEvent::Cleared { count });
        count
    }

    pub fn counts(&self) -> DeliveryCounts {
        self.ctx.stats.snapshot()
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus::new(
            self.processor.run_state(),
            self.mode,
            self.processor.workers(),
            self.ctx.queue.len(),
            self.ctx.queue.capacity_hint(),
            self.counts(),
        )
    }
}
