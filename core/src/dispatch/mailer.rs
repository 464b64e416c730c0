//! Mail sender capability
//!
//! The dispatch service only needs "send this, tell me if it worked". The
//! SMTP implementation lives in `smtp.rs`; tests plug in stubs.

use crate::transfer::Attachment;
use async_trait::async_trait;
use thiserror::Error;

/// A fully built message ready for the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

/// Failure reported by a mail sender. Displays as the bare cause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MailError(pub String);

impl MailError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

/// Outbound mail capability: one attempt, success or failure
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailError>;
}
