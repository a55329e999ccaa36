//! DispatcherBuilder - Dispatcher の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - config は `validate()` を通す
//! - `expect_kinds()` で指定した TaskKind を deliverer が扱えるかチェック

use std::sync::Arc;

use super::dispatcher::{DispatchMode, Dispatcher};
use super::processor::Processor;
use super::worker_loop::WorkerContext;
use crate::config::{ConfigError, DispatchConfig};
use crate::domain::TaskKind;
use crate::observability::DeliveryStats;
use crate::ports::{Clock, Deliverer, EventSink, IdGenerator, NoopEventSink, SystemClock, UlidGenerator};
use crate::queue::{DispatchQueue, InMemoryDispatchQueue};

/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(Arc::new(deliverer))
///     .config(DispatchConfig::load("herald.toml")?)
///     .expect_kinds(&TaskKind::ALL)
///     .build()?;
/// dispatcher.start();
/// ```
pub struct DispatcherBuilder {
    deliverer: Arc<dyn Deliverer>,
    config: DispatchConfig,
    queue: Option<Arc<dyn DispatchQueue>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    expected_kinds: Vec<TaskKind>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unsupported task kinds: {0:?}. These kinds were expected but the deliverer has no branch for them.")]
    UnsupportedKinds(Vec<TaskKind>),
}

impl DispatcherBuilder {
    pub fn new(deliverer: Arc<dyn Deliverer>) -> Self {
        Self {
            deliverer,
            config: DispatchConfig::default(),
            queue: None,
            events: Arc::new(NoopEventSink),
            clock: Arc::new(SystemClock),
            expected_kinds: Vec::new(),
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing queue instead of an in-memory one built from config.
    /// `queue_capacity` is ignored in that case.
    pub fn queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 期待される TaskKind を設定
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = kinds.to_vec();
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        self.config.validate()?;

        let unsupported: Vec<TaskKind> = self
            .expected_kinds
            .iter()
            .copied()
            .filter(|kind| !self.deliverer.supports(*kind))
            .collect();
        if !unsupported.is_empty() {
            return Err(BuildError::UnsupportedKinds(unsupported));
        }

        let id_generator: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let queue = self.queue.unwrap_or_else(|| {
            Arc::new(InMemoryDispatchQueue::with_generator(
                self.config.queue_capacity,
                Arc::clone(&self.clock),
                Arc::clone(&id_generator),
            ))
        });

        let ctx = Arc::new(WorkerContext {
            queue,
            deliverer: self.deliverer,
            retry_policy: self.config.retry_policy(),
            poll_interval: self.config.poll_interval(),
            stats: Arc::new(DeliveryStats::new()),
            events: self.events,
        });
        let processor = Processor::new(
            Arc::clone(&ctx),
            self.config.workers,
            self.config.shutdown_grace(),
        );
        let mode = if self.config.async_enabled {
            DispatchMode::Queued
        } else {
            DispatchMode::Direct
        };

        Ok(Dispatcher::from_parts(
            ctx,
            processor,
            mode,
            self.config.fallback_when_stopped,
            id_generator,
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::app::worker_loop::tests::{ScriptedDeliverer, task};
    use crate::domain::{DeliveryError, Task};
    use crate::ports::FixedClock;

    struct CredentialsOnly;

    #[async_trait]
    impl Deliverer for CredentialsOnly {
        fn supports(&self, kind: TaskKind) -> bool {
            matches!(kind, TaskKind::StudentCredentials | TaskKind::TeacherCredentials)
        }

        async fn deliver(&self, _task: &Task) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[test]
    fn test_build_success() {
        let dispatcher = DispatcherBuilder::new(Arc::new(ScriptedDeliverer::default()))
            .expect_kinds(&TaskKind::ALL)
            .build();
        assert!(dispatcher.is_ok());
    }

    #[test]
    fn test_build_unsupported_kinds() {
        let result = DispatcherBuilder::new(Arc::new(CredentialsOnly))
            .expect_kinds(&[TaskKind::StudentCredentials, TaskKind::PasswordReset])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::UnsupportedKinds(missing)) if missing == vec![TaskKind::PasswordReset]
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = DispatchConfig {
            workers: 0,
            ..DispatchConfig::default()
        };
        let result = DispatcherBuilder::new(Arc::new(CredentialsOnly)).config(config).build();
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_build_applies_config() {
        let config = DispatchConfig {
            async_enabled: false,
            workers: 3,
            queue_capacity: Some(10),
            ..DispatchConfig::default()
        };
        let dispatcher = DispatcherBuilder::new(Arc::new(CredentialsOnly))
            .config(config)
            .build()
            .unwrap();

        let status = dispatcher.status();
        assert_eq!(status.mode, DispatchMode::Direct);
        assert_eq!(status.workers, 3);
        assert_eq!(status.queue_capacity, Some(10));
    }

    #[test]
    fn test_build_uses_injected_clock() {
        let at = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let dispatcher = DispatcherBuilder::new(Arc::new(CredentialsOnly))
            .clock(Arc::new(FixedClock::new(at)))
            .build()
            .unwrap();

        dispatcher.submit_queued(task("clocked"));

        let pending = dispatcher.queue().snapshot();
        assert_eq!(pending[0].created_at(), Some(at));
        assert_eq!(pending[0].enqueued_at(), Some(at));
    }

    #[test]
    fn test_build_with_external_queue() {
        let queue = Arc::new(InMemoryDispatchQueue::bounded(2));
        let dispatcher = DispatcherBuilder::new(Arc::new(CredentialsOnly))
            .queue(queue.clone())
            .build()
            .unwrap();

        dispatcher.submit_queued(task("shared"));
        assert_eq!(queue.len(), 1);
        assert_eq!(dispatcher.status().queue_capacity, Some(2));
    }
}
