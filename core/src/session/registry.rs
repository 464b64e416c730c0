//! Session Registry: creates, claims and evicts pairing sessions

use super::{ClaimPolicy, Session, SessionId, SessionState};
use crate::config::SessionConfig;
use crate::{Result, TransferError};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shortest id we are willing to hand out
const MIN_ID_LENGTH: usize = 8;

/// Counters exposed through the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub pending: usize,
    pub claimed: usize,
    pub dispatched: usize,
    pub created_total: u64,
    pub evicted_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created_total: u64,
    evicted_total: u64,
}

/// Owns every live [`Session`]. All mutation of a single session happens
/// under the map's write lock, so racing claims serialize.
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    counters: Arc<RwLock<Counters>>,
}

impl SessionRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(Counters::default())),
        }
    }

    /// Generate a fresh session id and register it as `Pending`
    pub fn create_session(&self) -> SessionId {
        let length = self.config.id_length.max(MIN_ID_LENGTH);
        let mut sessions = self.sessions.write();

        let id = loop {
            let candidate = generate_id(length);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            warn!("Session id collision, regenerating");
        };

        sessions.insert(id.clone(), Session::new(id.clone()));
        self.counters.write().created_total += 1;

        info!("Session created: {}", id);
        id
    }

    /// Register a caller-chosen id, e.g. one generated by the desktop page.
    /// Registering a live id again is a no-op.
    pub fn register(&self, id: &str) -> Result<SessionId> {
        validate_id(id)?;
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(id) {
            if !self.expired(existing, Instant::now()) {
                return Ok(existing.id.clone());
            }
        }

        sessions.insert(id.to_string(), Session::new(id.to_string()));
        self.counters.write().created_total += 1;

        info!("Session registered: {}", id);
        Ok(id.to_string())
    }

    /// Associate an email address with a session and mark it `Claimed`
    pub fn claim(&self, id: &str, email: &str) -> Result<Session> {
        self.claim_then(id, email, |_| ()).map(|(session, _)| session)
    }

    /// Claim, then run `notify` on the updated session before the write lock
    /// is released. Competing claims cannot interleave between the two, so
    /// whatever `notify` emits is ordered the same way as the stored claims.
    /// `notify` must not call back into the registry.
    pub fn claim_then<F, R>(&self, id: &str, email: &str, notify: F) -> Result<(Session, R)>
    where
        F: FnOnce(&Session) -> R,
    {
        let email = validate_email(email)?;
        let mut sessions = self.sessions.write();
        let session = self.live_mut(&mut sessions, id)?;

        if self.config.claim_policy == ClaimPolicy::FirstWins {
            if let Some(existing) = &session.claimed_email {
                if !existing.eq_ignore_ascii_case(&email) {
                    warn!("Rejected repeat claim on session {}", id);
                    return Err(TransferError::AlreadyClaimed);
                }
            }
        }

        if let Some(previous) = session.claimed_email.replace(email.clone()) {
            if previous != email {
                debug!("Session {} re-claimed, replacing previous address", id);
            }
        }
        session.state = SessionState::Claimed;
        session.last_activity = Instant::now();

        info!("Session {} claimed by {}", id, email);
        let snapshot = session.clone();
        let notified = notify(&snapshot);
        Ok((snapshot, notified))
    }

    /// Snapshot of a live session
    pub fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read();
        sessions
            .get(id)
            .filter(|s| !self.expired(s, Instant::now()))
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Refresh the idle timer
    pub fn touch(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = self.live_mut(&mut sessions, id)?;
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Address a dispatch for this session should go to
    pub fn claimed_email(&self, id: &str) -> Result<String> {
        let session = self
            .get(id)
            .ok_or_else(|| TransferError::UnknownSession(id.to_string()))?;
        session.claimed_email.ok_or(TransferError::NotClaimed)
    }

    /// Apply the outcome of a dispatch attempt. Failure leaves the state alone
    /// so the desktop can submit again.
    pub fn record_dispatch(&self, id: &str, success: bool) -> Result<SessionState> {
        let mut sessions = self.sessions.write();
        let session = self.live_mut(&mut sessions, id)?;

        session.dispatch_count += 1;
        session.last_activity = Instant::now();
        if success && session.is_claimed() {
            session.state = SessionState::Dispatched;
        }

        Ok(session.state)
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!("Session removed: {}", id);
        }
        removed
    }

    /// Evict sessions past their idle or absolute TTL
    pub fn sweep_expired(&self) -> Vec<SessionId> {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> Vec<SessionId> {
        let mut sessions = self.sessions.write();
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| self.expired(s, now))
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }

        if !expired.is_empty() {
            self.counters.write().evicted_total += expired.len() as u64;
            info!("Evicted {} expired session(s)", expired.len());
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.read();
        let counters = self.counters.read();

        let count = |state: SessionState| sessions.values().filter(|s| s.state == state).count();

        RegistryStats {
            active: sessions.len(),
            pending: count(SessionState::Pending),
            claimed: count(SessionState::Claimed),
            dispatched: count(SessionState::Dispatched),
            created_total: counters.created_total,
            evicted_total: counters.evicted_total,
        }
    }

    fn expired(&self, session: &Session, now: Instant) -> bool {
        session.is_expired(now, self.config.idle_ttl(), self.config.absolute_ttl())
    }

    // Expired entries are treated as unknown but left in place: only the
    // sweeper evicts, so the hub can close their relay channels.
    fn live_mut<'a>(
        &self,
        sessions: &'a mut HashMap<SessionId, Session>,
        id: &str,
    ) -> Result<&'a mut Session> {
        let live = sessions
            .get(id)
            .is_some_and(|session| !self.expired(session, Instant::now()));
        if !live {
            return Err(TransferError::UnknownSession(id.to_string()));
        }

        sessions
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownSession(id.to_string()))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Alphanumeric token drawn from the OS random source
pub fn generate_id(length: usize) -> SessionId {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Caller-chosen ids: 6 to 64 characters of `[A-Za-z0-9_-]`
fn validate_id(id: &str) -> Result<()> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !(6..=64).contains(&id.len()) || !valid_chars {
        return Err(TransferError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<String> {
    let trimmed = email.trim();
    trimmed
        .parse::<lettre::Address>()
        .map(|_| trimmed.to_string())
        .map_err(|_| TransferError::InvalidEmail(trimmed.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
