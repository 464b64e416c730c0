//! Relay wire protocol: events pushed to clients and commands read from them
//!
//! Both directions are JSON text frames on the WebSocket. Server events carry
//! an `event` tag, client commands a `cmd` tag.

use crate::dispatch::DispatchResult;
use crate::session::SessionId;
use crate::{ErrorKind, TransferError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event name for the phone → desktop unlock signal
pub const UNLOCK_TERMINAL: &str = "unlockTerminal";
/// Event name for the terminal outcome of a dispatch
pub const DISPATCH_STATUS: &str = "dispatchStatus";

/// Events delivered to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RelayEvent {
    /// The session was claimed; the desktop may unlock
    UnlockTerminal { email: String },
    /// Outcome of one dispatch attempt
    DispatchStatus(DispatchResult),
    /// Direct reply to a `join`
    Joined { room: SessionId },
    /// Direct reply to a `send_package` that failed assembly
    PackageRejected { kind: ErrorKind, error: String },
    /// Direct reply to any other failed command
    Error { kind: Option<ErrorKind>, error: String },
}

impl RelayEvent {
    pub fn unlock(email: impl Into<String>) -> Self {
        RelayEvent::UnlockTerminal {
            email: email.into(),
        }
    }

    pub fn rejected(err: &TransferError) -> Self {
        RelayEvent::PackageRejected {
            kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn error(err: &TransferError) -> Self {
        RelayEvent::Error {
            kind: Some(err.kind()),
            error: err.to_string(),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::UnlockTerminal { .. } => UNLOCK_TERMINAL,
            RelayEvent::DispatchStatus(_) => DISPATCH_STATUS,
            RelayEvent::Joined { .. } => "joined",
            RelayEvent::PackageRejected { .. } => "packageRejected",
            RelayEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, RelayProtocolError> {
        serde_json::to_string(self).map_err(|e| RelayProtocolError::SerializationError(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, RelayProtocolError> {
        serde_json::from_str(text)
            .map_err(|e| RelayProtocolError::DeserializationError(e.to_string()))
    }
}

/// Commands a client sends over its connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Subscribe this connection to a session channel
    Join { room: SessionId },
    /// Submit a transfer for the joined session
    #[serde(alias = "send_via_gmail")]
    SendPackage {
        /// Informational; the claimed address is authoritative
        #[serde(default)]
        target_email: Option<String>,
        #[serde(default)]
        text: Option<String>,
        /// Base64, optionally behind a data-URI header
        #[serde(default)]
        file_data: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
    },
}

impl ClientCommand {
    pub fn from_json(text: &str) -> Result<Self, RelayProtocolError> {
        serde_json::from_str(text)
            .map_err(|e| RelayProtocolError::DeserializationError(e.to_string()))
    }

    pub fn command_type(&self) -> &'static str {
        match self {
            ClientCommand::Join { .. } => "join",
            ClientCommand::SendPackage { .. } => "send_package",
        }
    }
}

/// What a connection's outbound queue carries
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    /// Channel the event was published on; `None` for direct replies
    pub channel: Option<SessionId>,
    pub event: RelayEvent,
}

impl RelayFrame {
    pub fn broadcast(channel: &str, event: RelayEvent) -> Self {
        Self {
            channel: Some(channel.to_string()),
            event,
        }
    }

    pub fn direct(event: RelayEvent) -> Self {
        Self {
            channel: None,
            event,
        }
    }
}

/// Relay message serialization errors
#[derive(Debug, Error)]
pub enum RelayProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

// ============================================================================
// TESTS
// ============================================================================
