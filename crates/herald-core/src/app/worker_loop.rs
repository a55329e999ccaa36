//! WorkerLoop - タスク配送ループ
//!
//! # フロー
//! 1. `try_dequeue()` で先頭タスクを取得（Pending -> Processing）
//! 2. 空なら poll interval だけ待つ（shutdown と競合させる）
//! 3. Deliverer 実行
//! 4. 成功: Sent / 失敗: retry_count を増やして Retry（末尾に再投入）か Failed
//!
//! A panic anywhere in one iteration (deliverer, queue, event sink) is caught;
//! the task the worker held is reported as abandoned and the loop keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;

use crate::domain::{DeliveryError, Task};
use crate::observability::DeliveryStats;
use crate::ports::{Deliverer, DispatchEvent, EventSink};
use crate::queue::{DispatchQueue, RetryDecision, RetryPolicy, TaskStatus};

/// What happened to a task after one pass through the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Sent,
    Requeued,
    Failed,
}

/// Everything a worker needs, shared by all workers and the inline path.
pub struct WorkerContext {
    pub queue: Arc<dyn DispatchQueue>,
    pub deliverer: Arc<dyn Deliverer>,
    pub retry_policy: RetryPolicy,
    pub poll_interval: Duration,
    pub stats: Arc<DeliveryStats>,
    pub events: Arc<dyn EventSink>,
}

impl WorkerContext {
    /// Deliver one dequeued task and apply the retry policy.
    pub async fn process(&self, mut task: Task) -> TaskOutcome {
        tracing::info!(
            task_id = task.log_id(),
            kind = %task.kind(),
            recipient = %task.recipient().address,
            tenant = task.context().tenant_id.as_deref(),
            retry_count = task.retry_count(),
            "processing task"
        );

        match attempt_delivery(self.deliverer.as_ref(), &task).await {
            Ok(()) => {
                if let Err(err) = task.mark_sent() {
                    tracing::error!(task_id = task.log_id(), error = %err, "bad status after delivery");
                }
                self.stats.record_sent();
                tracing::info!(
                    task_id = task.log_id(),
                    recipient = %task.recipient().address,
                    "task delivered"
                );
                self.emit(DispatchEvent::Sent(task));
                TaskOutcome::Sent
            }
            Err(err) => self.handle_failure(task, err),
        }
    }

    fn handle_failure(&self, mut task: Task, err: DeliveryError) -> TaskOutcome {
        task.record_failure(err.to_string());

        if err.is_permanent() {
            return self.give_up(task, &err);
        }

        match self.retry_policy.decide(task.retry_count()) {
            RetryDecision::GiveUp => self.give_up(task, &err),
            RetryDecision::Requeue => {
                if let Err(transition) = task.mark_retry() {
                    tracing::error!(task_id = task.log_id(), error = %transition, "cannot schedule retry");
                    return self.give_up(task, &err);
                }
                tracing::warn!(
                    task_id = task.log_id(),
                    recipient = %task.recipient().address,
                    retry_count = task.retry_count(),
                    max_retries = self.retry_policy.max_retries,
                    error = %err,
                    "delivery failed, will retry"
                );

                let requeued = task.clone();
                match self.queue.enqueue(task) {
                    Ok(_) => {
                        self.stats.record_retried();
                        self.emit(DispatchEvent::RetryScheduled(requeued));
                        TaskOutcome::Requeued
                    }
                    Err(rejected) => {
                        tracing::error!(
                            task_id = rejected.task.log_id(),
                            error = %rejected.error,
                            "could not requeue task for retry"
                        );
                        self.give_up(rejected.task, &err)
                    }
                }
            }
        }
    }

    fn give_up(&self, mut task: Task, err: &DeliveryError) -> TaskOutcome {
        if let Err(transition) = task.mark_failed() {
            tracing::error!(task_id = task.log_id(), error = %transition, "bad status on failure");
        }
        self.stats.record_failed();
        tracing::error!(
            task_id = task.log_id(),
            recipient = %task.recipient().address,
            retry_count = task.retry_count(),
            max_retries = self.retry_policy.max_retries,
            error = %err,
            "task failed permanently"
        );
        self.emit(DispatchEvent::Failed(task));
        TaskOutcome::Failed
    }

    /// One attempt, no retry. Used by the inline (synchronous) submission path.
    ///
    /// Only Pending tasks can be delivered; anything else comes back with
    /// `DeliveryError::NotDeliverable` and the deliverer is not called.
    pub async fn deliver_once(&self, mut task: Task) -> Result<Task, (Task, DeliveryError)> {
        let status = task.status();
        if status != TaskStatus::Pending || task.mark_processing().is_err() {
            tracing::warn!(task_id = task.log_id(), ?status, "refusing inline delivery");
            return Err((task, DeliveryError::NotDeliverable { status }));
        }

        match attempt_delivery(self.deliverer.as_ref(), &task).await {
            Ok(()) => {
                if let Err(err) = task.mark_sent() {
                    tracing::error!(task_id = task.log_id(), error = %err, "bad status after delivery");
                }
                self.stats.record_delivered_inline();
                self.emit(DispatchEvent::Sent(task.clone()));
                Ok(task)
            }
            Err(err) => {
                task.record_failure(err.to_string());
                if let Err(transition) = task.mark_failed() {
                    tracing::error!(task_id = task.log_id(), error = %transition, "bad status on failure");
                }
                self.stats.record_failed();
                tracing::error!(task_id = task.log_id(), error = %err, "inline delivery failed");
                self.emit(DispatchEvent::Failed(task.clone()));
                Err((task, err))
            }
        }
    }

    /// Hand an event to the sink. A panicking sink is logged and otherwise
    /// ignored.
    pub(crate) fn emit(&self, event: DispatchEvent) {
        let task_id = event.task().map(|task| task.log_id().to_string());
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| self.events.emit(event))) {
            tracing::error!(
                task_id = task_id.as_deref(),
                panic = %panic_message(panic.as_ref()),
                "event sink panicked"
            );
        }
    }

    /// Report a task whose worker died or was aborted mid-delivery.
    pub(crate) fn abandon(&self, mut task: Task, reason: &str) {
        if let Err(transition) = task.mark_failed() {
            tracing::error!(task_id = task.log_id(), error = %transition, "bad status on abandon");
        }
        self.stats.record_abandoned();
        tracing::error!(
            task_id = task.log_id(),
            recipient = %task.recipient().address,
            retry_count = task.retry_count(),
            reason,
            "task abandoned while in flight"
        );
        self.emit(DispatchEvent::Abandoned(task));
    }
}

/// Call the deliverer, turning unsupported kinds and panics into errors.
pub async fn attempt_delivery(deliverer: &dyn Deliverer, task: &Task) -> Result<(), DeliveryError> {
    if !deliverer.supports(task.kind()) {
        tracing::warn!(task_id = task.log_id(), kind = %task.kind(), "unknown task kind");
        return Err(DeliveryError::unsupported(
            task.kind(),
            "no deliverer branch for this kind",
        ));
    }

    match AssertUnwindSafe(deliverer.deliver(task)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(DeliveryError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The task a worker currently holds, shared with whoever may have to abort
/// the worker.
#[derive(Debug, Clone, Default)]
pub struct InFlightSlot(Arc<Mutex<Option<Task>>>);

impl InFlightSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Task>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, task: Task) {
        *self.lock() = Some(task);
    }

    /// Remove and return the held task, if any.
    pub fn take(&self) -> Option<Task> {
        self.lock().take()
    }
}

/// A single consumer loop. Several may share one queue.
pub struct WorkerLoop {
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    shutdown_rx: watch::Receiver<bool>,
    in_flight: InFlightSlot,
}

impl WorkerLoop {
    pub fn new(worker_id: usize, ctx: Arc<WorkerContext>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            worker_id,
            ctx,
            shutdown_rx,
            in_flight: InFlightSlot::default(),
        }
    }

    pub fn in_flight(&self) -> InFlightSlot {
        self.in_flight.clone()
    }

    fn next_task(&self) -> Option<Task> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.ctx.queue.try_dequeue())) {
            Ok(next) => next,
            Err(panic) => {
                tracing::error!(
                    worker_id = self.worker_id,
                    panic = %panic_message(panic.as_ref()),
                    "queue panicked on dequeue"
                );
                None
            }
        }
    }

    pub async fn run(mut self) {
        let worker_id = self.worker_id;
        tracing::info!(worker_id, "worker loop started");

        loop {
            // shutdown が来ていたら次を取らずに抜ける
            if *self.shutdown_rx.borrow() {
                break;
            }

            if let Some(task) = self.next_task() {
                self.in_flight.set(task.clone());
                let result = AssertUnwindSafe(self.ctx.process(task)).catch_unwind().await;
                let held = self.in_flight.take();
                if let Err(panic) = result {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!(worker_id, panic = %reason, "worker panicked while processing a task");
                    if let Some(task) = held {
                        self.ctx.abandon(task, &reason);
                    }
                }
                continue;
            }

            // 空なら poll interval だけ待つ。shutdown と競合させる
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        // sender dropped: nobody can stop us any more, so stop now
                        break;
                    }
                }
                _ = tokio::time::sleep(self.ctx.poll_interval) => {}
            }
        }

        tracing::info!(worker_id, "worker loop stopped");
    }
}
