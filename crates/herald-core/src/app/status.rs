//! Status - 処理状況のスナップショット
//!
//! Read-only. Collecting a status takes the queue lock once for the length and
//! nothing else, so it is safe to call while workers are busy.

use serde::{Deserialize, Serialize};

use super::dispatcher::DispatchMode;
use super::processor::RunState;
use crate::observability::DeliveryCounts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub run_state: RunState,
    pub running: bool,
    pub mode: DispatchMode,
    pub workers: usize,
    pub queue_size: usize,
    pub queue_empty: bool,
    /// `None` for an unbounded queue.
    pub queue_capacity: Option<usize>,
    pub counts: DeliveryCounts,
    pub summary: String,
}

impl ProcessorStatus {
    pub fn new(
        run_state: RunState,
        mode: DispatchMode,
        workers: usize,
        queue_size: usize,
        capacity_hint: usize,
        counts: DeliveryCounts,
    ) -> Self {
        let running = run_state == RunState::Running;
        let queue_capacity = (capacity_hint != usize::MAX).then_some(capacity_hint);
        let summary = format!(
            "Dispatch Processor Status - Running: {running}, Queue Size: {queue_size}, Async Enabled: {}",
            mode == DispatchMode::Queued
        );
        Self {
            run_state,
            running,
            mode,
            workers,
            queue_size,
            queue_empty: queue_size == 0,
            queue_capacity,
            counts,
            summary,
        }
    }
}
