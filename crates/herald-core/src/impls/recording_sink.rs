//! RecordingEventSink - DispatchEvent を記録する EventSink（テスト・CLI 用）

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::Task;
use crate::ports::{DispatchEvent, EventSink};

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DispatchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.lock().clone()
    }

    fn tasks(&self, pick: impl Fn(&DispatchEvent) -> Option<&Task>) -> Vec<Task> {
        self.lock().iter().filter_map(|e| pick(e).cloned()).collect()
    }

    /// Sent tasks, in delivery order.
    pub fn sent(&self) -> Vec<Task> {
        self.tasks(|e| match e {
            DispatchEvent::Sent(task) => Some(task),
            _ => None,
        })
    }

    pub fn retries(&self) -> Vec<Task> {
        self.tasks(|e| match e {
            DispatchEvent::RetryScheduled(task) => Some(task),
            _ => None,
        })
    }

    pub fn failed(&self) -> Vec<Task> {
        self.tasks(|e| match e {
            DispatchEvent::Failed(task) => Some(task),
            _ => None,
        })
    }

    pub fn abandoned(&self) -> Vec<Task> {
        self.tasks(|e| match e {
            DispatchEvent::Abandoned(task) => Some(task),
            _ => None,
        })
    }

    /// Counts from each administrative clear.
    pub fn cleared(&self) -> Vec<usize> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::Cleared { count } => Some(*count),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DispatchEvent) {
        self.lock().push(event);
    }
}
