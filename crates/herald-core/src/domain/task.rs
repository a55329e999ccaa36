//! Task - 配送待ちの作業単位
//!
//! A task is created by request-handling code and then owned by the queue
//! until a worker dequeues it. Only the queue and the worker loop change its
//! status and retry count; everything else is fixed at construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{RequestContext, TaskId};
use crate::queue::TaskStatus;

/// What kind of message a task carries. Selects the deliverer branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    StudentCredentials,
    TeacherCredentials,
    WelcomeMessage,
    PasswordReset,
    Verification,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::StudentCredentials,
        TaskKind::TeacherCredentials,
        TaskKind::WelcomeMessage,
        TaskKind::PasswordReset,
        TaskKind::Verification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::StudentCredentials => "student_credentials",
            TaskKind::TeacherCredentials => "teacher_credentials",
            TaskKind::WelcomeMessage => "welcome_message",
            TaskKind::PasswordReset => "password_reset",
            TaskKind::Verification => "verification",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Name for salutations; falls back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Kind-specific data. Which fields are required depends on [`TaskKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub username: Option<String>,
    pub temporary_secret: Option<String>,
    /// Reset or verification link.
    pub link: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: Option<TaskId>,
    kind: TaskKind,
    recipient: Recipient,
    payload: TaskPayload,
    context: RequestContext,

    /// Set on first enqueue.
    created_at: Option<DateTime<Utc>>,
    /// Set on every enqueue, retries included.
    enqueued_at: Option<DateTime<Utc>>,

    /// Number of failed delivery attempts so far.
    retry_count: u32,
    status: TaskStatus,
    last_error: Option<String>,
}

impl Task {
    pub fn new(kind: TaskKind, recipient: Recipient) -> Self {
        Self {
            id: None,
            kind,
            recipient,
            payload: TaskPayload::default(),
            context: RequestContext::default(),
            created_at: None,
            enqueued_at: None,
            retry_count: 0,
            status: TaskStatus::Pending,
            last_error: None,
        }
    }

    /// Credentials notice for a newly created student or teacher account.
    pub fn credentials(
        kind: TaskKind,
        recipient: Recipient,
        username: impl Into<String>,
        temporary_secret: impl Into<String>,
    ) -> Self {
        Self::new(kind, recipient)
            .with_username(username)
            .with_temporary_secret(temporary_secret)
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.payload.username = Some(username.into());
        self
    }

    pub fn with_temporary_secret(mut self, secret: impl Into<String>) -> Self {
        self.payload.temporary_secret = Some(secret.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.payload.link = Some(link.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.payload.subject = Some(subject.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.payload.body = Some(body.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn id(&self) -> Option<&TaskId> {
        self.id.as_ref()
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// New tasks and tasks waiting for a retry can go (back) on the queue.
    pub fn is_enqueueable(&self) -> bool {
        self.status == TaskStatus::Pending || self.status.can_transition_to(TaskStatus::Pending)
    }

    /// Id for logging; tasks that were never enqueued have none yet.
    pub fn log_id(&self) -> &str {
        self.id.as_ref().map(TaskId::as_str).unwrap_or("<unassigned>")
    }

    pub(crate) fn assign_id_if_missing(&mut self, make: impl FnOnce() -> TaskId) -> &TaskId {
        self.id.get_or_insert_with(make)
    }

    /// Queue 側で呼ぶ: Pending に戻して enqueue 時刻を刻む
    pub(crate) fn mark_enqueued(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if self.status != TaskStatus::Pending {
            self.advance(TaskStatus::Pending)?;
        }
        self.created_at.get_or_insert(now);
        self.enqueued_at = Some(now);
        Ok(())
    }

    pub(crate) fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Processing)
    }

    pub(crate) fn mark_sent(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Sent)
    }

    /// Record a failed attempt. The retry count only ever goes up.
    pub(crate) fn record_failure(&mut self, error: String) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error);
    }

    pub(crate) fn mark_retry(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Retry)
    }

    pub(crate) fn mark_failed(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Failed)
    }

    fn advance(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
