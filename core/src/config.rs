//! Hub configuration
//!
//! Every section is serde-friendly and has a usable default, so the CLI can
//! persist the whole tree as one JSON document. Mail credentials are normally
//! injected from the environment via [`MailConfig::apply_env`].

use crate::session::ClaimPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound for text + decoded attachment (5 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;

pub const ENV_SMTP_SERVER: &str = "SMTP_SERVER";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_SMTP_EMAIL: &str = "SMTP_EMAIL";
pub const ENV_SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const ENV_MAIL_SENDER: &str = "MAIL_SENDER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub session: SessionConfig,
    pub transfer: TransferConfig,
    pub relay: RelayConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of generated session ids (alphanumeric characters)
    pub id_length: usize,
    /// Evict a session after this long without activity
    pub idle_ttl_secs: u64,
    /// Evict a session this long after creation regardless of activity
    pub absolute_ttl_secs: u64,
    /// What a second claim on the same session does
    pub claim_policy: ClaimPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id_length: 16,
            idle_ttl_secs: 15 * 60,
            absolute_ttl_secs: 2 * 3600,
            claim_policy: ClaimPolicy::Overwrite,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn absolute_ttl(&self) -> Duration {
        Duration::from_secs(self.absolute_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub max_payload_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Events buffered per connection before new ones are dropped for it
    pub subscriber_queue_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: 64,
        }
    }
}

/// Outbound mail gateway settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    /// Authentication identity
    pub username: Option<String>,
    /// Authentication secret
    pub password: Option<String>,
    /// "From" address; falls back to `username` when unset
    pub from_address: Option<String>,
    pub subject: String,
    pub send_timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: "smtp-relay.brevo.com".to_string(),
            port: 2525,
            username: None,
            password: None,
            from_address: None,
            subject: "Public PC Transfer".to_string(),
            send_timeout_secs: 30,
        }
    }
}

// Hand-written so the password never ends up in logs.
impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("subject", &self.subject)
            .field("send_timeout_secs", &self.send_timeout_secs)
            .finish()
    }
}

impl MailConfig {
    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get(ENV_SMTP_SERVER) {
            self.host = host;
        }
        if let Some(port) = get(ENV_SMTP_PORT) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid {}={}", ENV_SMTP_PORT, port),
            }
        }
        if let Some(user) = get(ENV_SMTP_EMAIL) {
            self.username = Some(user);
        }
        if let Some(password) = get(ENV_SMTP_PASSWORD) {
            self.password = Some(password);
        }
        if let Some(sender) = get(ENV_MAIL_SENDER) {
            self.from_address = Some(sender);
        }
    }

    /// Both identity and secret are present and non-empty
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.is_empty());
        present(&self.username) && present(&self.password)
    }

    /// Address the mail is sent from
    pub fn sender_address(&self) -> Option<&str> {
        self.from_address
            .as_deref()
            .or(self.username.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
