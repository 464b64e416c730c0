//! Session pairing: ephemeral ids linking a desktop viewer to a claiming phone

pub mod registry;

pub use registry::{RegistryStats, SessionRegistry};

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Opaque session token; doubles as the relay channel name.
pub type SessionId = String;

/// Pairing state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, nobody has claimed it yet
    Pending,
    /// An email address is associated
    Claimed,
    /// At least one transfer was delivered
    Dispatched,
}

/// What a claim does when the session already carries an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Last claim wins
    #[default]
    Overwrite,
    /// Only re-claims with the same address are accepted
    FirstWins,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub claimed_email: Option<String>,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Completed dispatch attempts, successful or not
    pub dispatch_count: u32,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::Pending,
            claimed_email: None,
            created_at: now,
            last_activity: now,
            dispatch_count: 0,
        }
    }

    /// A zero TTL disables that bound.
    pub fn is_expired(&self, now: Instant, idle_ttl: Duration, absolute_ttl: Duration) -> bool {
        let too_old = !absolute_ttl.is_zero()
            && now.saturating_duration_since(self.created_at) >= absolute_ttl;
        let idle = !idle_ttl.is_zero()
            && now.saturating_duration_since(self.last_activity) >= idle_ttl;
        too_old || idle
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_email.is_some()
    }
}
