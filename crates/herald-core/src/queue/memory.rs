//! In-memory dispatch queue implementation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{DispatchQueue, EnqueueRejected, QueueError};
use crate::domain::{Task, TaskId};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// In-memory FIFO queue.
///
/// Design:
/// - `VecDeque<Task>` behind a std `Mutex`. The lock is never held across an
///   `.await`, so `enqueue` stays synchronous and never suspends the caller.
/// - `Notify` wakes a waiting `dequeue` when a task arrives.
/// - Unbounded by default; `bounded(n)` rejects once `n` tasks are pending.
pub struct InMemoryDispatchQueue {
    tasks: Mutex<VecDeque<Task>>,
    notify: Notify,
    capacity: Option<usize>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDispatchQueue {
    pub fn unbounded() -> Self {
        Self::with_parts(None, Arc::new(SystemClock))
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::with_parts(Some(capacity), Arc::new(SystemClock))
    }

    /// Build with an explicit clock (tests pin `created_at` this way).
    pub fn with_parts(capacity: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        let id_generator = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_generator(capacity, clock, id_generator)
    }

    pub fn with_generator(
        capacity: Option<usize>,
        clock: Arc<dyn Clock>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            id_generator,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_head(tasks: &mut VecDeque<Task>) -> Option<Task> {
        let mut task = tasks.pop_front()?;
        if let Err(err) = task.mark_processing() {
            tracing::error!(task_id = task.log_id(), error = %err, "dequeued task in unexpected status");
        }
        tracing::debug!(task_id = task.log_id(), recipient = %task.recipient().address, "task dequeued");
        Some(task)
    }
}

impl Default for InMemoryDispatchQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    fn enqueue(&self, mut task: Task) -> Result<TaskId, EnqueueRejected> {
        if !task.is_enqueueable() {
            let error = QueueError::NotEnqueueable {
                status: task.status(),
            };
            tracing::warn!(task_id = task.log_id(), %error, "refusing to enqueue task");
            return Err(EnqueueRejected { error, task });
        }

        let mut tasks = self.lock();
        if let Some(capacity) = self.capacity
            && tasks.len() >= capacity
        {
            drop(tasks);
            tracing::warn!(task_id = task.log_id(), capacity, "failed to enqueue task, queue is full");
            return Err(EnqueueRejected {
                error: QueueError::Full { capacity },
                task,
            });
        }

        let task_id = task
            .assign_id_if_missing(|| self.id_generator.generate_task_id())
            .clone();
        if let Err(error) = task.mark_enqueued(self.clock.now()) {
            // is_enqueueable() で確認済みなので通常ここには来ない
            let status = error.from;
            drop(tasks);
            return Err(EnqueueRejected {
                error: QueueError::NotEnqueueable { status },
                task,
            });
        }

        tracing::debug!(%task_id, recipient = %task.recipient().address, "task enqueued");
        tasks.push_back(task);
        drop(tasks);

        // 待機中の worker を起こす
        self.notify.notify_one();
        Ok(task_id)
    }

    async fn dequeue(&self) -> Task {
        loop {
            // Register interest before checking, so a push between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let head = Self::take_head(&mut self.lock());
            if let Some(task) = head {
                return task;
            }
            notified.await;
        }
    }

    fn try_dequeue(&self) -> Option<Task> {
        Self::take_head(&mut self.lock())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn capacity_hint(&self) -> usize {
        self.capacity.unwrap_or(usize::MAX)
    }

    fn clear(&self) -> usize {
        let removed = {
            let mut tasks = self.lock();
            let removed = tasks.len();
            tasks.clear();
            removed
        };
        tracing::warn!(removed, "cleared pending tasks from queue");
        removed
    }

    fn snapshot(&self) -> Vec<Task> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{Recipient, TaskKind};
    use crate::ports::FixedClock;
    use crate::queue::TaskStatus;

    fn task(n: usize) -> Task {
        Task::new(
            TaskKind::WelcomeMessage,
            Recipient::new(format!("user{n}@example.org")),
        )
        .with_username(format!("user{n}"))
    }

    #[test]
    fn enqueue_assigns_id_and_stamps_pending() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let queue = InMemoryDispatchQueue::with_parts(None, Arc::new(FixedClock::new(at)));

        let id = queue.enqueue(task(1)).unwrap();

        let pending = queue.snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), Some(&id));
        assert_eq!(pending[0].status(), TaskStatus::Pending);
        assert_eq!(pending[0].created_at(), Some(at));
        assert!(id.as_str().starts_with("task-"));
    }

    #[test]
    fn caller_supplied_id_is_kept() {
        let queue = InMemoryDispatchQueue::unbounded();
        let id = queue.enqueue(task(1).with_id("EMAIL_1")).unwrap();
        assert_eq!(id.as_str(), "EMAIL_1");
    }

    #[test]
    fn dequeue_order_matches_enqueue_order() {
        let queue = InMemoryDispatchQueue::unbounded();
        let ids: Vec<TaskId> = (0..50).map(|n| queue.enqueue(task(n)).unwrap()).collect();

        let mut seen = Vec::new();
        while let Some(t) = queue.try_dequeue() {
            assert_eq!(t.status(), TaskStatus::Processing);
            seen.push(t.id().cloned().unwrap());
        }

        assert_eq!(seen, ids);
        assert!(queue.is_empty());
    }

    #[test]
    fn try_dequeue_on_empty_returns_none() {
        let queue = InMemoryDispatchQueue::unbounded();
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn bounded_queue_rejects_and_returns_the_task() {
        let queue = InMemoryDispatchQueue::bounded(2);
        queue.enqueue(task(1)).unwrap();
        queue.enqueue(task(2)).unwrap();

        let rejected = queue.enqueue(task(3).with_id("third")).unwrap_err();

        assert_eq!(rejected.error, QueueError::Full { capacity: 2 });
        assert_eq!(rejected.task.id().map(TaskId::as_str), Some("third"));
        assert_eq!(rejected.task.created_at(), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity_hint(), 2);
    }

    #[test]
    fn terminal_task_is_not_enqueueable() {
        let queue = InMemoryDispatchQueue::unbounded();
        queue.enqueue(task(1)).unwrap();
        let mut sent = queue.try_dequeue().unwrap();
        sent.mark_sent().unwrap();

        let rejected = queue.enqueue(sent).unwrap_err();
        assert_eq!(
            rejected.error,
            QueueError::NotEnqueueable {
                status: TaskStatus::Sent
            }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_only_drops_pending_tasks() {
        let queue = InMemoryDispatchQueue::unbounded();
        for n in 0..4 {
            queue.enqueue(task(n)).unwrap();
        }
        let in_flight = queue.try_dequeue().unwrap();

        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
        assert_eq!(in_flight.status(), TaskStatus::Processing);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn introspection_of_unbounded_queue() {
        let queue = InMemoryDispatchQueue::unbounded();
        assert_eq!(queue.capacity_hint(), usize::MAX);
        assert!(queue.is_empty());
        queue.enqueue(task(1)).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.stats_line(),
            format!("Queue Stats - Size: 1, Capacity: {}, Empty: false", usize::MAX)
        );
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(InMemoryDispatchQueue::unbounded());

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let id = queue.enqueue(task(1)).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(got.id(), Some(&id));
        assert_eq!(got.status(), TaskStatus::Processing);
    }

    #[tokio::test]
    async fn each_task_goes_to_exactly_one_consumer() {
        let queue = Arc::new(InMemoryDispatchQueue::unbounded());
        for n in 0..200 {
            queue.enqueue(task(n)).unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(t) = queue.try_dequeue() {
                    got.push(t.id().cloned().unwrap());
                    tokio::task::yield_now().await;
                }
                got
            }));
        }

        let mut all = Vec::new();
        for c in consumers {
            all.extend(c.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 200);
        assert_eq!(all.len(), 200);
    }
}
