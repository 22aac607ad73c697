//! SMTP transport using the `lettre` crate.

use async_trait::async_trait;
use grantwarden_application::{MessageTransport, NotificationPayload};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::Subject;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::message_rendering::render_text_body;

/// SMTP transport configuration.
#[derive(Clone)]
pub struct SmtpTransportConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// SMTP username.
    pub username: String,
    /// SMTP password.
    pub password: String,
    /// Sender email address.
    pub from_address: String,
}

/// Production transport delivering notifications by email.
#[derive(Clone)]
pub struct SmtpMessageTransport {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMessageTransport {
    /// Validates the sender address and builds the SMTP relay once.
    pub fn new(config: SmtpTransportConfig) -> AppResult<Self> {
        let from = config
            .from_address
            .parse()
            .map_err(|error| AppError::Internal(format!("invalid from address: {error}")))?;

        let credentials = Credentials::new(config.username, config.password);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|error| {
                AppError::Internal(format!("failed to create SMTP transport: {error}"))
            })?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { from, mailer })
    }
}

#[async_trait]
impl MessageTransport for SmtpMessageTransport {
    async fn send(&self, recipient: &Subject, payload: &NotificationPayload) -> AppResult<()> {
        let to_mailbox: Mailbox = recipient.as_str().parse().map_err(|error| {
            AppError::Transport(format!("invalid recipient address '{recipient}': {error}"))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(payload.subject_line.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(render_text_body(payload))
            .map_err(|error| AppError::Transport(format!("failed to build email: {error}")))?;

        self.mailer
            .send(message)
            .await
            .map_err(|error| AppError::Transport(format!("failed to send email: {error}")))?;

        Ok(())
    }
}
