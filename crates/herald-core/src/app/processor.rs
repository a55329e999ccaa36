//! Processor - worker loop のライフサイクル管理
//!
//! Idle -> Running -> ShutDown. A processor that has been stopped cannot be
//! started again; build a new one instead.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::worker_loop::{InFlightSlot, WorkerContext, WorkerLoop};
use crate::domain::TaskId;
use crate::queue::DispatchQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Never started.
    Idle,
    Running,
    /// Stopped for good.
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { workers: usize },
    AlreadyRunning,
    /// The processor was stopped earlier and cannot be restarted.
    ShutDown,
    /// `start()` was called outside a Tokio runtime.
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Workers were signalled and joined; `aborted` of them had to be
    /// terminated after the grace period. `abandoned` lists the tasks those
    /// workers were delivering.
    Stopped {
        aborted: usize,
        abandoned: Vec<TaskId>,
    },
    NotRunning,
}

/// Worker group handle.
/// - `shutdown_tx` に true を送るとワーカー全体が止まる
/// - join handle で全ワーカーの終了を待つ
/// - in-flight slot で abort されたワーカーのタスクを拾う
struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(JoinHandle<()>, InFlightSlot)>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    fn spawn(n: usize, ctx: &Arc<WorkerContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..n)
            .map(|worker_id| {
                let worker = WorkerLoop::new(worker_id, Arc::clone(ctx), shutdown_rx.clone());
                let slot = worker.in_flight();
                (tokio::spawn(worker.run()), slot)
            })
            .collect();

        Self {
            shutdown_tx,
            workers,
        }
    }

    /// Signal every worker, wait up to `grace`, abort whatever is left.
    /// Tasks held by aborted workers are reported through `ctx.abandon`.
    async fn shutdown_and_join(self, grace: Duration, ctx: &WorkerContext) -> (usize, Vec<TaskId>) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        let mut abandoned = Vec::new();
        for (mut join, slot) in self.workers {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "worker task panicked"),
                Err(_) => {
                    join.abort();
                    // wait for the abort to land so nothing keeps running
                    let _ = join.await;
                    aborted += 1;
                }
            }
            if let Some(task) = slot.take() {
                abandoned.extend(task.id().cloned());
                ctx.abandon(task, "worker aborted after shutdown grace period");
            }
        }
        (aborted, abandoned)
    }
}

enum Lifecycle {
    Idle,
    Running(WorkerGroup),
    ShutDown,
}

impl Lifecycle {
    fn run_state(&self) -> RunState {
        match self {
            Lifecycle::Idle => RunState::Idle,
            Lifecycle::Running(_) => RunState::Running,
            Lifecycle::ShutDown => RunState::ShutDown,
        }
    }
}

pub struct Processor {
    ctx: Arc<WorkerContext>,
    workers: usize,
    shutdown_grace: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl Processor {
    pub fn new(ctx: Arc<WorkerContext>, workers: usize, shutdown_grace: Duration) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
            shutdown_grace,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run_state(&self) -> RunState {
        self.lifecycle().run_state()
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Spawn the worker loops. Must be called from within a Tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut lifecycle = self.lifecycle();
        match lifecycle.run_state() {
            RunState::Running => {
                tracing::warn!("processor is already running");
                StartOutcome::AlreadyRunning
            }
            RunState::ShutDown => {
                tracing::warn!("processor has been shut down and cannot be restarted");
                StartOutcome::ShutDown
            }
            RunState::Idle => {
                if tokio::runtime::Handle::try_current().is_err() {
                    tracing::warn!("processor start requested outside a Tokio runtime");
                    return StartOutcome::NoRuntime;
                }
                *lifecycle = Lifecycle::Running(WorkerGroup::spawn(self.workers, &self.ctx));
                tracing::info!(
                    workers = self.workers,
                    poll_interval_ms = self.ctx.poll_interval.as_millis() as u64,
                    max_retries = self.ctx.retry_policy.max_retries,
                    "processor started"
                );
                StartOutcome::Started {
                    workers: self.workers,
                }
            }
        }
    }

    /// Signal the workers, wait for in-flight deliveries up to the grace
    /// period, then abort. Pending tasks stay on the queue untouched.
    pub async fn stop(&self) -> StopOutcome {
        let group = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown) {
                Lifecycle::Running(group) => group,
                previous => {
                    *lifecycle = previous;
                    tracing::warn!("processor is not running");
                    return StopOutcome::NotRunning;
                }
            }
        };

        let (aborted, abandoned) = group.shutdown_and_join(self.shutdown_grace, &self.ctx).await;
        if aborted > 0 {
            tracing::warn!(
                aborted,
                abandoned = abandoned.len(),
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "processor forced to shut down after grace period"
            );
        }
        tracing::info!(pending = self.ctx.queue.len(), "processor stopped");
        StopOutcome::Stopped { aborted, abandoned }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::app::worker_loop::tests::{ScriptedDeliverer, task};
    use crate::domain::{DeliveryError, Task};
    use crate::impls::RecordingEventSink;
    use crate::observability::DeliveryStats;
    use crate::ports::Deliverer;
    use crate::queue::{DispatchQueue, InMemoryDispatchQueue, RetryPolicy, TaskStatus};

    /// Blocks every delivery until released.
    #[derive(Default)]
    struct GatedDeliverer {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Deliverer for GatedDeliverer {
        async fn deliver(&self, _task: &Task) -> Result<(), DeliveryError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    /// Tracks how many deliveries run at the same time.
    #[derive(Default)]
    struct PeakTrackingDeliverer {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Deliverer for PeakTrackingDeliverer {
        async fn deliver(&self, _task: &Task) -> Result<(), DeliveryError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn processor_with(
        deliverer: Arc<dyn Deliverer>,
        workers: usize,
        grace: Duration,
    ) -> (Processor, Arc<InMemoryDispatchQueue>, Arc<RecordingEventSink>) {
        let queue = Arc::new(InMemoryDispatchQueue::unbounded());
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(WorkerContext {
            queue: queue.clone(),
            deliverer,
            retry_policy: RetryPolicy::new(3),
            poll_interval: Duration::from_millis(5),
            stats: Arc::new(DeliveryStats::new()),
            events: events.clone(),
        });
        (Processor::new(ctx, workers, grace), queue, events)
    }

    #[tokio::test]
    async fn start_twice_keeps_one_worker_group() {
        let (processor, _queue, _events) =
            processor_with(Arc::new(ScriptedDeliverer::default()), 1, Duration::from_secs(1));

        assert_eq!(processor.start(), StartOutcome::Started { workers: 1 });
        assert_eq!(processor.start(), StartOutcome::AlreadyRunning);
        assert_eq!(processor.run_state(), RunState::Running);

        assert_eq!(processor.stop().await, StopOutcome::Stopped { aborted: 0, abandoned: vec![] });
    }

    #[tokio::test]
    async fn second_start_adds_no_concurrent_worker() {
        let deliverer = Arc::new(PeakTrackingDeliverer::default());
        let (processor, queue, events) =
            processor_with(deliverer.clone(), 1, Duration::from_secs(1));
        for n in 0..6 {
            queue.enqueue(task(&format!("c{n}"))).unwrap();
        }

        processor.start();
        processor.start();
        for _ in 0..200 {
            if events.sent().len() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        processor.stop().await;

        assert_eq!(events.sent().len(), 6);
        assert_eq!(deliverer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_twice_is_a_warning_no_op() {
        let (processor, _queue, _events) =
            processor_with(Arc::new(ScriptedDeliverer::default()), 2, Duration::from_secs(1));
        processor.start();

        assert_eq!(processor.stop().await, StopOutcome::Stopped { aborted: 0, abandoned: vec![] });
        assert_eq!(processor.stop().await, StopOutcome::NotRunning);
        assert_eq!(processor.run_state(), RunState::ShutDown);
    }

    #[tokio::test]
    async fn stopped_processor_cannot_restart() {
        let (processor, _queue, _events) =
            processor_with(Arc::new(ScriptedDeliverer::default()), 1, Duration::from_secs(1));
        processor.start();
        processor.stop().await;

        assert_eq!(processor.start(), StartOutcome::ShutDown);
        assert!(!processor.is_running());
    }

    #[tokio::test]
    async fn stop_before_start_leaves_processor_startable() {
        let (processor, _queue, _events) =
            processor_with(Arc::new(ScriptedDeliverer::default()), 1, Duration::from_secs(1));

        assert_eq!(processor.stop().await, StopOutcome::NotRunning);
        assert_eq!(processor.run_state(), RunState::Idle);
        assert_eq!(processor.start(), StartOutcome::Started { workers: 1 });
        processor.stop().await;
    }

    #[test]
    fn start_outside_runtime_is_refused() {
        let (processor, _queue, _events) =
            processor_with(Arc::new(ScriptedDeliverer::default()), 1, Duration::from_secs(1));
        assert_eq!(processor.start(), StartOutcome::NoRuntime);
        assert_eq!(processor.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn stop_lets_in_flight_task_finish_and_leaves_backlog_pending() {
        let deliverer = Arc::new(GatedDeliverer::default());
        let (processor, queue, events) =
            processor_with(deliverer.clone(), 1, Duration::from_secs(5));
        let processor = Arc::new(processor);

        queue.enqueue(task("gate")).unwrap();
        for n in 0..5 {
            queue.enqueue(task(&format!("pending-{n}"))).unwrap();
        }
        processor.start();
        deliverer.entered.notified().await;

        let stopping = tokio::spawn({
            let processor = Arc::clone(&processor);
            async move { processor.stop().await }
        });
        // give stop() time to send the signal before the gate opens
        tokio::time::sleep(Duration::from_millis(20)).await;
        deliverer.release.notify_one();

        let outcome = stopping.await.unwrap();
        assert_eq!(outcome, StopOutcome::Stopped { aborted: 0, abandoned: vec![] });

        assert_eq!(events.sent().len(), 1);
        let pending = queue.snapshot();
        assert_eq!(pending.len(), 5);
        assert!(pending.iter().all(|t| t.status() == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn stop_aborts_delivery_that_outlives_grace_period() {
        let deliverer = Arc::new(GatedDeliverer::default());
        let (processor, queue, events) =
            processor_with(deliverer.clone(), 1, Duration::from_millis(50));

        queue.enqueue(task("stuck")).unwrap();
        processor.start();
        deliverer.entered.notified().await;

        let outcome = processor.stop().await;

        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                aborted: 1,
                abandoned: vec![TaskId::new("stuck")]
            }
        );
        assert!(events.sent().is_empty());
        let abandoned = events.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].status(), TaskStatus::Failed);
        assert_eq!(processor.run_state(), RunState::ShutDown);
    }
}
