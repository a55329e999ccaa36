//! Task identifiers.
//!
//! Callers may bring their own id (e.g. a correlation key from the request
//! layer). When they don't, the queue assigns one at enqueue time through an
//! [`IdGenerator`](crate::ports::IdGenerator), which produces `task-<ULID>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const GENERATED_PREFIX: &str = "task-";

/// Identifier of a [`Task`](crate::domain::Task).
///
/// A plain string on the wire; ids minted by the queue are ULID based so they
/// sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID から TaskId を作成（`task-` プレフィックス付き）
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{GENERATED_PREFIX}{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ULID part, if this id was minted by an [`IdGenerator`](crate::ports::IdGenerator).
    pub fn as_ulid(&self) -> Option<Ulid> {
        self.0
            .strip_prefix(GENERATED_PREFIX)
            .and_then(|raw| Ulid::from_string(raw).ok())
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
