//! Dispatch Service: one send attempt per call, outcome published on the
//! session's relay channel.

use super::mailer::{MailSender, OutboundMessage};
use super::template::render_body;
use super::DispatchResult;
use crate::config::MailConfig;
use crate::relay::{RelayChannel, RelayEvent};
use crate::session::SessionRegistry;
use crate::transfer::TransferPackage;
use crate::{Result, TransferError};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DispatchService {
    config: MailConfig,
    sender: Arc<dyn MailSender>,
    registry: Arc<SessionRegistry>,
    relay: Arc<RelayChannel>,
}

impl DispatchService {
    pub fn new(
        config: MailConfig,
        sender: Arc<dyn MailSender>,
        registry: Arc<SessionRegistry>,
        relay: Arc<RelayChannel>,
    ) -> Self {
        Self {
            config,
            sender,
            registry,
            relay,
        }
    }

    /// Mail `package` to the session's claimed address.
    ///
    /// Exactly one `dispatchStatus` is published per call, whatever the
    /// outcome. Success moves the session to `Dispatched`; failure leaves it
    /// where it was so the desktop can try again.
    pub async fn dispatch(&self, session_id: &str, package: TransferPackage) -> DispatchResult {
        let outcome = self.attempt(session_id, package).await;
        let result = DispatchResult::from(&outcome);

        match &outcome {
            Ok(()) => info!("Dispatch for session {} delivered", session_id),
            Err(e) => warn!("Dispatch for session {} failed: {}", session_id, e),
        }

        // Unknown sessions have nothing to record; the publish below is then a no-op too.
        if let Err(e) = self.registry.record_dispatch(session_id, result.success) {
            warn!("Could not record dispatch outcome: {}", e);
        }
        self.relay
            .publish(session_id, RelayEvent::DispatchStatus(result.clone()));

        result
    }

    /// Build the message the gateway will receive. Fails with
    /// `MissingCredentials` before anything touches the network.
    pub fn build_message(&self, recipient: &str, package: TransferPackage) -> Result<OutboundMessage> {
        if !self.config.has_credentials() {
            return Err(TransferError::MissingCredentials);
        }
        let from = self
            .config
            .sender_address()
            .ok_or(TransferError::MissingCredentials)?
            .to_string();

        Ok(OutboundMessage {
            from,
            to: recipient.to_string(),
            subject: self.config.subject.clone(),
            html_body: render_body(&package),
            attachment: package.attachment,
        })
    }

    async fn attempt(&self, session_id: &str, package: TransferPackage) -> Result<()> {
        let recipient = self.registry.claimed_email(session_id)?;
        let message = self.build_message(&recipient, package)?;

        let timeout = self.config.send_timeout();
        if timeout.is_zero() {
            return self
                .sender
                .send(message)
                .await
                .map_err(|e| TransferError::TransportFailure(e.to_string()));
        }

        match tokio::time::timeout(timeout, self.sender.send(message)).await {
            Ok(sent) => sent.map_err(|e| TransferError::TransportFailure(e.to_string())),
            Err(_) => Err(TransferError::TransportFailure(format!(
                "mail gateway did not respond within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::mailer::{MailError, MockMailSender};
    use crate::relay::RelayFrame;
    use crate::session::SessionState;
    use crate::ErrorKind;
    use tokio::sync::mpsc;

    fn credentials() -> MailConfig {
        MailConfig {
            username: Some("relay-user".to_string()),
            password: Some("secret".to_string()),
            from_address: Some("noreply@example.org".to_string()),
            ..Default::default()
        }
    }

    struct Fixture {
        service: DispatchService,
        registry: Arc<SessionRegistry>,
        session_id: String,
        rx: mpsc::Receiver<RelayFrame>,
    }

    fn fixture(config: MailConfig, sender: MockMailSender) -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let relay = Arc::new(RelayChannel::new());
        let session_id = registry.create_session();
        registry.claim(&session_id, "s@college.edu").unwrap();

        let (conn, rx) = relay.connect();
        relay.subscribe(&session_id, conn);

        let service = DispatchService::new(config, Arc::new(sender), registry.clone(), relay);
        Fixture {
            service,
            registry,
            session_id,
            rx,
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let mut sender = MockMailSender::new();
        sender
            .expect_send()
            .withf(|m| {
                m.to == "s@college.edu"
                    && m.from == "noreply@example.org"
                    && m.subject == "Public PC Transfer"
                    && m.html_body.contains("hello")
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut f = fixture(credentials(), sender);
        let result = f
            .service
            .dispatch(&f.session_id, TransferPackage::text("hello"))
            .await;

        assert_eq!(result, DispatchResult::ok());
        assert_eq!(f.registry.get(&f.session_id).unwrap().state, SessionState::Dispatched);
        assert_eq!(
            f.rx.try_recv().unwrap().event,
            RelayEvent::DispatchStatus(DispatchResult::ok())
        );
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_session_claimed() {
        let mut sender = MockMailSender::new();
        sender
            .expect_send()
            .times(1)
            .returning(|_| Err(MailError::new("auth error")));

        let mut f = fixture(credentials(), sender);
        let result = f.service.dispatch(&f.session_id, TransferPackage::default()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("auth error"));
        assert_eq!(result.kind, Some(ErrorKind::TransportFailure));
        assert_eq!(f.registry.get(&f.session_id).unwrap().state, SessionState::Claimed);
        assert_eq!(f.rx.try_recv().unwrap().event, RelayEvent::DispatchStatus(result));
    }

    #[tokio::test]
    async fn test_missing_credentials_never_calls_sender() {
        let mut sender = MockMailSender::new();
        sender.expect_send().times(0);

        let mut f = fixture(MailConfig::default(), sender);
        let result = f.service.dispatch(&f.session_id, TransferPackage::text("hi")).await;

        assert_eq!(result.kind, Some(ErrorKind::MissingCredentials));
        assert!(f.rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unclaimed_session_is_rejected() {
        let mut sender = MockMailSender::new();
        sender.expect_send().times(0);

        let f = fixture(credentials(), sender);
        let pending = f.registry.create_session();
        let result = f.service.dispatch(&pending, TransferPackage::text("hi")).await;

        assert_eq!(result.kind, Some(ErrorKind::NotClaimed));
        assert_eq!(f.registry.get(&pending).unwrap().state, SessionState::Pending);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let mut sender = MockMailSender::new();
        sender.expect_send().times(0);

        let f = fixture(credentials(), sender);
        let result = f.service.dispatch("missing", TransferPackage::text("hi")).await;
        assert_eq!(result.kind, Some(ErrorKind::UnknownSession));
    }

    #[test]
    fn test_build_message_escapes_text_and_keeps_attachment() {
        let f = fixture(credentials(), MockMailSender::new());
        let package = TransferPackage {
            text: Some("<img src=x>".to_string()),
            attachment: Some(crate::transfer::Attachment {
                filename: "a.bin".to_string(),
                bytes: vec![9; 4],
            }),
        };

        let message = f.service.build_message("s@college.edu", package).unwrap();
        assert!(message.html_body.contains("&lt;img src=x&gt;"));
        assert_eq!(message.attachment.unwrap().bytes, vec![9; 4]);
    }

    #[test]
    fn test_sender_defaults_to_username() {
        let config = MailConfig {
            from_address: None,
            username: Some("me@example.org".to_string()),
            ..credentials()
        };
        let f = fixture(config, MockMailSender::new());
        let message = f.service.build_message("s@college.edu", TransferPackage::default()).unwrap();
        assert_eq!(message.from, "me@example.org");
    }
}
