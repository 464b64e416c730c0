// Configuration management for the pctransfer CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/pctransfer/config.json
// - Linux: ~/.config/pctransfer/config.json
// - Windows: %APPDATA%\pctransfer\config.json
//
// Mail credentials are usually left out of the file and supplied through
// SMTP_EMAIL / SMTP_PASSWORD instead; see `Config::effective_hub`.

use anyhow::{Context, Result};
use pctransfer_core::{ClaimPolicy, HubConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the HTTP + WebSocket server listens on
    pub listen_port: u16,

    /// Interface to bind
    pub bind_address: String,

    /// Base URL phones should use for the mobile link. When unset it is
    /// derived from the request's Host / X-Forwarded-Proto headers.
    pub public_base_url: Option<String>,

    /// How often expired sessions are swept
    pub sweep_interval_secs: u64,

    /// Sessions, relay, payload limit and mail settings
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 5000,
            bind_address: "0.0.0.0".to_string(),
            public_base_url: None,
            sweep_interval_secs: 60,
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("pctransfer");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Hub settings with the mail environment variables applied on top
    pub fn effective_hub(&self) -> HubConfig {
        let mut hub = self.hub.clone();
        hub.mail.apply_env();
        hub
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let session = &mut self.hub.session;
        let mail = &mut self.hub.mail;

        match key {
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "bind_address" => {
                value
                    .parse::<std::net::IpAddr>()
                    .context("Invalid IP address")?;
                self.bind_address = value.to_string();
            }
            "public_base_url" => {
                self.public_base_url = optional(value.trim_end_matches('/'));
            }
            "sweep_interval_secs" => {
                self.sweep_interval_secs = value.parse().context("Invalid number")?;
            }
            "session.id_length" => {
                session.id_length = value.parse().context("Invalid number")?;
            }
            "session.idle_ttl_secs" => {
                session.idle_ttl_secs = value.parse().context("Invalid number")?;
            }
            "session.absolute_ttl_secs" => {
                session.absolute_ttl_secs = value.parse().context("Invalid number")?;
            }
            "session.claim_policy" => {
                session.claim_policy = match value {
                    "overwrite" => ClaimPolicy::Overwrite,
                    "first_wins" => ClaimPolicy::FirstWins,
                    _ => anyhow::bail!("Invalid claim policy (expected overwrite or first_wins)"),
                };
            }
            "transfer.max_payload_bytes" => {
                self.hub.transfer.max_payload_bytes = value.parse().context("Invalid number")?;
            }
            "relay.subscriber_queue_depth" => {
                let depth: usize = value.parse().context("Invalid number")?;
                anyhow::ensure!(depth > 0, "Queue depth must be at least 1");
                self.hub.relay.subscriber_queue_depth = depth;
            }
            "mail.host" => {
                mail.host = value.to_string();
            }
            "mail.port" => {
                mail.port = value.parse().context("Invalid port number")?;
            }
            "mail.username" => {
                mail.username = optional(value);
            }
            "mail.password" => {
                mail.password = optional(value);
            }
            "mail.from_address" => {
                mail.from_address = optional(value);
            }
            "mail.subject" => {
                mail.subject = value.to_string();
            }
            "mail.send_timeout_secs" => {
                mail.send_timeout_secs = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value. The mail password is never returned in clear.
    pub fn get(&self, key: &str) -> Option<String> {
        let session = &self.hub.session;
        let mail = &self.hub.mail;

        match key {
            "listen_port" => Some(self.listen_port.to_string()),
            "bind_address" => Some(self.bind_address.clone()),
            "public_base_url" => self.public_base_url.clone(),
            "sweep_interval_secs" => Some(self.sweep_interval_secs.to_string()),
            "session.id_length" => Some(session.id_length.to_string()),
            "session.idle_ttl_secs" => Some(session.idle_ttl_secs.to_string()),
            "session.absolute_ttl_secs" => Some(session.absolute_ttl_secs.to_string()),
            "session.claim_policy" => Some(claim_policy_name(session.claim_policy).to_string()),
            "transfer.max_payload_bytes" => Some(self.hub.transfer.max_payload_bytes.to_string()),
            "relay.subscriber_queue_depth" => Some(self.hub.relay.subscriber_queue_depth.to_string()),
            "mail.host" => Some(mail.host.clone()),
            "mail.port" => Some(mail.port.to_string()),
            "mail.username" => mail.username.clone(),
            "mail.password" => mail.password.as_ref().map(|_| "********".to_string()),
            "mail.from_address" => mail.from_address.clone(),
            "mail.subject" => Some(mail.subject.clone()),
            "mail.send_timeout_secs" => Some(mail.send_timeout_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key).unwrap_or_else(|| "(unset)".to_string());
                (key.to_string(), value)
            })
            .collect()
    }
}

const KEYS: &[&str] = &[
    "listen_port",
    "bind_address",
    "public_base_url",
    "sweep_interval_secs",
    "session.id_length",
    "session.idle_ttl_secs",
    "session.absolute_ttl_secs",
    "session.claim_policy",
    "transfer.max_payload_bytes",
    "relay.subscriber_queue_depth",
    "mail.host",
    "mail.port",
    "mail.username",
    "mail.password",
    "mail.from_address",
    "mail.subject",
    "mail.send_timeout_secs",
];

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn claim_policy_name(policy: ClaimPolicy) -> &'static str {
    match policy {
        ClaimPolicy::Overwrite => "overwrite",
        ClaimPolicy::FirstWins => "first_wins",
    }
}
