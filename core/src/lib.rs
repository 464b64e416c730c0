// PC Transfer Core: Pairing, Relay and Dispatch
//
// A desktop viewer opens a session, a phone claims it with an email address,
// and whatever the desktop submits is mailed to that address. Nothing here
// outlives the process.

pub mod config;
pub mod dispatch;
pub mod hub;
pub mod relay;
pub mod session;
pub mod transfer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{HubConfig, MailConfig, RelayConfig, SessionConfig, TransferConfig};
pub use dispatch::{DispatchResult, DispatchService, MailSender, OutboundMessage, SmtpMailer};
pub use hub::{HubConnection, HubStats, TransferHub};
pub use relay::{ClientCommand, ConnectionId, RelayChannel, RelayEvent, RelayFrame};
pub use session::{ClaimPolicy, Session, SessionId, SessionRegistry, SessionState};
pub use transfer::{Attachment, TransferAssembler, TransferPackage};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Everything that can go wrong between pairing and delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Session already claimed by another address")]
    AlreadyClaimed,
    #[error("Session has not been claimed yet")]
    NotClaimed,
    #[error("Recipient {0} does not match the address that claimed this session")]
    RecipientMismatch(String),
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Mail credentials are not configured")]
    MissingCredentials,
    /// Carries the gateway's own message untouched so clients see the real cause.
    #[error("{0}")]
    TransportFailure(String),
}

/// Machine-readable category of a [`TransferError`], sent to clients next to
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownSession,
    InvalidSessionId,
    InvalidEmail,
    AlreadyClaimed,
    NotClaimed,
    RecipientMismatch,
    InvalidAttachment,
    PayloadTooLarge,
    MissingCredentials,
    TransportFailure,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::UnknownSession(_) => ErrorKind::UnknownSession,
            TransferError::InvalidSessionId(_) => ErrorKind::InvalidSessionId,
            TransferError::InvalidEmail(_) => ErrorKind::InvalidEmail,
            TransferError::AlreadyClaimed => ErrorKind::AlreadyClaimed,
            TransferError::NotClaimed => ErrorKind::NotClaimed,
            TransferError::RecipientMismatch(_) => ErrorKind::RecipientMismatch,
            TransferError::InvalidAttachment(_) => ErrorKind::InvalidAttachment,
            TransferError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            TransferError::MissingCredentials => ErrorKind::MissingCredentials,
            TransferError::TransportFailure(_) => ErrorKind::TransportFailure,
        }
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownSession => "unknown_session",
            ErrorKind::InvalidSessionId => "invalid_session_id",
            ErrorKind::InvalidEmail => "invalid_email",
            ErrorKind::AlreadyClaimed => "already_claimed",
            ErrorKind::NotClaimed => "not_claimed",
            ErrorKind::RecipientMismatch => "recipient_mismatch",
            ErrorKind::InvalidAttachment => "invalid_attachment",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::MissingCredentials => "missing_credentials",
            ErrorKind::TransportFailure => "transport_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
