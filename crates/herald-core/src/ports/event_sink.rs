//! EventSink port - 配送結果の通知
//!
//! Failed tasks are dropped from memory, so the sink is how anything outside
//! the worker loop learns what happened to them.

use crate::domain::Task;

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// Delivered by a worker or inline.
    Sent(Task),
    /// Failed and put back on the queue.
    RetryScheduled(Task),
    /// Failed permanently.
    Failed(Task),
    /// In flight when its worker panicked or was aborted; delivery may or may
    /// not have happened.
    Abandoned(Task),
    /// Removed by an administrative clear before delivery.
    Cleared { count: usize },
}

impl DispatchEvent {
    pub fn task(&self) -> Option<&Task> {
        match self {
            DispatchEvent::Sent(task)
            | DispatchEvent::RetryScheduled(task)
            | DispatchEvent::Failed(task)
            | DispatchEvent::Abandoned(task) => Some(task),
            DispatchEvent::Cleared { .. } => None,
        }
    }
}

/// Called from worker tasks; must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: DispatchEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Recipient, TaskKind};

    #[test]
    fn task_events_expose_their_task() {
        let task = Task::new(TaskKind::WelcomeMessage, Recipient::new("a@example.org")).with_id("a");

        for event in [
            DispatchEvent::Sent(task.clone()),
            DispatchEvent::RetryScheduled(task.clone()),
            DispatchEvent::Failed(task.clone()),
            DispatchEvent::Abandoned(task.clone()),
        ] {
            assert_eq!(event.task().map(Task::log_id), Some("a"));
        }
        assert!(DispatchEvent::Cleared { count: 2 }.task().is_none());
    }
}
