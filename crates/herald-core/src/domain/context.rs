//! Request context carried on a task.
//!
//! Workers run outside the request that submitted the task, so tenant and
//! actor identity travel with the task itself instead of ambient state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Option<String>,
    pub actor: Option<String>,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tenant_and_actor() {
        let context = RequestContext::new("tenant-1").with_actor("teacher-7");
        assert_eq!(context.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(context.actor.as_deref(), Some("teacher-7"));
    }

    #[test]
    fn default_carries_no_identity() {
        let context = RequestContext::default();
        assert_eq!(context.tenant_id, None);
        assert_eq!(context.actor, None);
    }
}
