//! 開発用・テスト用 Mailer

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::DeliveryError;
use crate::ports::{Mailer, OutboundMessage};

/// Keeps every sent message in memory. `fail_next(n)` makes the next `n`
/// sends fail with a transport error.
#[derive(Debug, Default)]
pub struct InMemoryMailer {
    outbox: Mutex<Vec<OutboundMessage>>,
    failures_left: AtomicU32,
    attempts: AtomicUsize,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutboundMessage>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outbox(&self) -> Vec<OutboundMessage> {
        self.lock().clone()
    }

    /// Successful and failed sends.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::transport(format!(
                "simulated transport failure sending to {}",
                message.to
            )));
        }
        self.lock().push(message);
        Ok(())
    }
}

/// Writes each message to the log instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body_len = message.body.len(),
            "mail sent"
        );
        Ok(())
    }
}
