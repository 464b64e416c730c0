//! Dispatch: mailing an assembled package to the session's claimed address

pub mod mailer;
pub mod service;
pub mod smtp;
pub mod template;

pub use mailer::{MailError, MailSender, OutboundMessage};
pub use service::DispatchService;
pub use smtp::SmtpMailer;

use crate::{ErrorKind, TransferError};
use serde::{Deserialize, Serialize};

/// Outcome of one dispatch attempt, as published on `dispatchStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    /// Human-readable cause; present iff `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl DispatchResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            kind: None,
        }
    }

    pub fn failed(err: &TransferError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

impl From<&crate::Result<()>> for DispatchResult {
    fn from(outcome: &crate::Result<()>) -> Self {
        match outcome {
            Ok(()) => DispatchResult::ok(),
            Err(e) => DispatchResult::failed(e),
        }
    }
}
