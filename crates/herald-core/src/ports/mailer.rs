//! Mailer port - メール送信トランスポート
//!
//! SMTP (or any other transport) sits behind this trait. `MailDeliverer`
//! turns tasks into [`OutboundMessage`]s and hands them here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), DeliveryError>;
}
