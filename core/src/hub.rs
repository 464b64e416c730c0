//! Transfer Hub: the service object handlers are given
//!
//! Owns the session registry, the relay and the dispatch service, and wires
//! the pairing flow together: create → join → claim → submit → status.

use crate::config::HubConfig;
use crate::dispatch::{DispatchResult, DispatchService, MailError, MailSender, SmtpMailer};
use crate::relay::{ClientCommand, ConnectionId, RelayChannel, RelayEvent, RelayFrame, RelayStats};
use crate::session::{RegistryStats, Session, SessionId, SessionRegistry};
use crate::transfer::{TransferAssembler, TransferPackage};
use crate::{Result, TransferError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub sessions: RegistryStats,
    pub relay: RelayStats,
}

#[derive(Clone)]
pub struct TransferHub {
    registry: Arc<SessionRegistry>,
    relay: Arc<RelayChannel>,
    assembler: TransferAssembler,
    dispatcher: Arc<DispatchService>,
}

impl TransferHub {
    pub fn new(config: HubConfig, sender: Arc<dyn MailSender>) -> Self {
        let registry = Arc::new(SessionRegistry::with_config(config.session));
        let relay = Arc::new(RelayChannel::with_config(config.relay));
        let assembler = TransferAssembler::new(&config.transfer);
        let dispatcher = Arc::new(DispatchService::new(
            config.mail,
            sender,
            registry.clone(),
            relay.clone(),
        ));

        Self {
            registry,
            relay,
            assembler,
            dispatcher,
        }
    }

    /// Hub that mails through the configured SMTP relay
    pub fn with_smtp(config: HubConfig) -> std::result::Result<Self, MailError> {
        let mailer = SmtpMailer::from_config(&config.mail)?;
        Ok(Self::new(config, Arc::new(mailer)))
    }

    pub fn relay(&self) -> &RelayChannel {
        &self.relay
    }

    /// Upper bound for text plus decoded attachment
    pub fn max_payload_bytes(&self) -> usize {
        self.assembler.limit()
    }

    pub fn create_session(&self) -> SessionId {
        self.registry.create_session()
    }

    /// Register an id chosen by the desktop client
    pub fn register_session(&self, session_id: &str) -> Result<SessionId> {
        self.registry.register(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.registry.get(session_id)
    }

    /// Register a client connection with the relay
    pub fn open_connection(&self) -> (HubConnection, mpsc::Receiver<RelayFrame>) {
        let (id, rx) = self.relay.connect();
        let connection = HubConnection {
            hub: self.clone(),
            id,
            session: None,
        };
        (connection, rx)
    }

    /// Subscribe a connection to a registered session's channel
    pub fn join(&self, session_id: &str, connection: ConnectionId) -> Result<()> {
        self.registry.touch(session_id)?;
        if !self.relay.subscribe(session_id, connection) {
            warn!("Join from unknown connection {}", connection);
        }
        Ok(())
    }

    /// Phone-side claim: record the address and unlock every subscriber.
    /// The unlock is queued before the registry lock is released, so the
    /// last `unlockTerminal` a desktop sees names the stored claim.
    /// Returns how many connections were notified.
    pub fn claim(&self, session_id: &str, email: &str) -> Result<usize> {
        let relay = &self.relay;
        let (_, notified) = self.registry.claim_then(session_id, email, |session| {
            let email = session.claimed_email.clone().unwrap_or_default();
            relay.publish(session_id, RelayEvent::unlock(email))
        })?;
        Ok(notified)
    }

    pub fn assemble(
        &self,
        text: Option<&str>,
        file_data: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<TransferPackage> {
        self.assembler.assemble(text, file_data, file_name)
    }

    pub async fn dispatch(&self, session_id: &str, package: TransferPackage) -> DispatchResult {
        self.dispatcher.dispatch(session_id, package).await
    }

    /// Assemble now, dispatch on a background task. Assembly errors come back
    /// to the caller; dispatch outcomes go out as `dispatchStatus`.
    pub fn submit(
        &self,
        session_id: &str,
        text: Option<&str>,
        file_data: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<JoinHandle<DispatchResult>> {
        if !self.registry.contains(session_id) {
            return Err(TransferError::UnknownSession(session_id.to_string()));
        }
        let package = self.assemble(text, file_data, file_name)?;

        let dispatcher = self.dispatcher.clone();
        let session_id = session_id.to_string();
        Ok(tokio::spawn(async move {
            dispatcher.dispatch(&session_id, package).await
        }))
    }

    /// Evict expired sessions and close their channels
    pub fn sweep_expired(&self) -> Vec<SessionId> {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> Vec<SessionId> {
        let expired = self.registry.sweep_expired_at(now);
        for id in &expired {
            self.relay.close_channel(id);
        }
        expired
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.registry.stats(),
            relay: self.relay.get_stats(),
        }
    }
}

/// Per-connection command handling. Dropping it unsubscribes everywhere.
pub struct HubConnection {
    hub: TransferHub,
    id: ConnectionId,
    session: Option<SessionId>,
}

impl HubConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session this connection last joined
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Parse and handle one text frame. Malformed frames get an `error` reply.
    pub fn handle_text(&mut self, text: &str) -> Option<JoinHandle<DispatchResult>> {
        match ClientCommand::from_json(text) {
            Ok(cmd) => self.handle(cmd),
            Err(e) => {
                debug!("Connection {} sent malformed command: {}", self.id, e);
                self.reply(RelayEvent::Error {
                    kind: None,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Handle one command. A successful `send_package` yields the handle of
    /// the background dispatch.
    pub fn handle(&mut self, cmd: ClientCommand) -> Option<JoinHandle<DispatchResult>> {
        match cmd {
            ClientCommand::Join { room } => {
                self.join(room);
                None
            }
            ClientCommand::SendPackage {
                target_email,
                text,
                file_data,
                file_name,
            } => self.send_package(
                target_email.as_deref(),
                text.as_deref(),
                file_data.as_deref(),
                file_name.as_deref(),
            ),
        }
    }

    fn join(&mut self, room: SessionId) {
        if let Err(e) = self.hub.join(&room, self.id) {
            self.reply(RelayEvent::error(&e));
            return;
        }

        if let Some(previous) = self.session.replace(room.clone()) {
            if previous != room {
                self.hub.relay.unsubscribe(&previous, self.id);
            }
        }
        info!("Connection {} joined session {}", self.id, room);
        self.reply(RelayEvent::Joined { room });
    }

    fn send_package(
        &mut self,
        target_email: Option<&str>,
        text: Option<&str>,
        file_data: Option<&str>,
        file_name: Option<&str>,
    ) -> Option<JoinHandle<DispatchResult>> {
        let Some(session_id) = self.session.clone() else {
            self.reply(RelayEvent::Error {
                kind: None,
                error: "join a session before sending".to_string(),
            });
            return None;
        };

        // The desktop echoes the address it was unlocked with. A stale one
        // means a newer claim landed and the user has not seen it yet.
        let target = target_email.map(str::trim).filter(|t| !t.is_empty());
        if let (Some(target), Ok(claimed)) =
            (target, self.hub.registry.claimed_email(&session_id))
        {
            if !target.eq_ignore_ascii_case(&claimed) {
                let e = TransferError::RecipientMismatch(target.to_string());
                warn!("Package for session {} rejected: {}", session_id, e);
                self.reply(RelayEvent::rejected(&e));
                return None;
            }
        }

        match self.hub.submit(&session_id, text, file_data, file_name) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Package for session {} rejected: {}", session_id, e);
                self.reply(RelayEvent::rejected(&e));
                None
            }
        }
    }

    fn reply(&self, event: RelayEvent) {
        self.hub.relay.send_to(self.id, event);
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.hub.relay.disconnect(self.id);
    }
}

// ============================================================================
// TESTS
// ============================================================================
