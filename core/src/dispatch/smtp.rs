//! SMTP mail sender backed by lettre's async tokio transport

use super::mailer::{MailError, MailSender, OutboundMessage};
use crate::config::MailConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// STARTTLS relay with optional login. Building it does not touch the
/// network; the connection is made on the first send.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    endpoint: String,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::new(format!("invalid SMTP relay {}: {}", config.host, e)))?
            .port(config.port);

        if !config.send_timeout().is_zero() {
            builder = builder.timeout(Some(config.send_timeout()));
        }

        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            endpoint: format!("{}:{}", config.host, config.port),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, message: OutboundMessage) -> Result<(), MailError> {
        let email = build_email(message)?;
        debug!("Sending mail via {}", self.endpoint);

        self.transport
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| MailError::new(e.to_string()))
    }
}

/// Convert into a `multipart/mixed` message: HTML body plus the optional file
pub fn build_email(message: OutboundMessage) -> Result<Message, MailError> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| MailError::new(format!("invalid sender address {}: {}", message.from, e)))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| MailError::new(format!("invalid recipient address {}: {}", message.to, e)))?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(message.html_body));

    if let Some(attachment) = message.attachment {
        let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
            .map_err(|e| MailError::new(e.to_string()))?;
        body = body.singlepart(
            MailAttachment::new(attachment.filename).body(attachment.bytes, content_type),
        );
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject)
        .multipart(body)
        .map_err(|e| MailError::new(e.to_string()))
}
