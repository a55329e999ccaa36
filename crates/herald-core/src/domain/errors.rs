//! Errors - 配送エラーと分類
//!
//! A delivery failure is either retried by the worker loop or ends the task.
//! [`ErrorKind`] is the only thing the retry logic looks at.

use thiserror::Error;

use super::TaskKind;
use crate::queue::TaskStatus;

/// ErrorKind は配送エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライ対象）
/// - Permanent: 恒久的なエラー（リトライ無意味）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The transport failed (connection refused, timeout, 5xx, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The deliverer ran but reported failure without a transport error.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// No branch of the deliverer can handle this task.
    #[error("unsupported task kind: {kind}: {reason}")]
    UnsupportedKind { kind: TaskKind, reason: String },

    /// The task is not in a state a delivery can start from. No attempt was made.
    #[error("task cannot be delivered from status {status:?}")]
    NotDeliverable { status: TaskStatus },

    /// The deliverer panicked while handling the task.
    #[error("deliverer panicked: {0}")]
    Panicked(String),
}

impl DeliveryError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn unsupported(kind: TaskKind, reason: impl Into<String>) -> Self {
        Self::UnsupportedKind {
            kind,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::UnsupportedKind { .. } | DeliveryError::NotDeliverable { .. } => {
                ErrorKind::Permanent
            }
            DeliveryError::Transport(_)
            | DeliveryError::Rejected(_)
            | DeliveryError::Panicked(_) => ErrorKind::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }
}
