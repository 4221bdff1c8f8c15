// Outbound email delivery for order confirmations

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, instrument};

use crate::orders::template::{RenderedEmail, SHOP_NAME};
use crate::settings::MailSettings;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail transport not configured")]
    NotConfigured,
    #[error("invalid address: {0}")]
    Address(String),
    #[error("message build error: {0}")]
    Build(String),
    #[error("smtp error: {0}")]
    Smtp(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &MailSettings) -> Result<Self, NotifyError> {
        if !cfg.is_configured() {
            return Err(NotifyError::NotConfigured);
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(cfg.address.clone(), cfg.password.clone()))
            .timeout(Some(cfg.timeout))
            .build();

        let from: Mailbox = format!("{SHOP_NAME} <{}>", cfg.address)
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, email), fields(to = %email.to))]
    async fn send(&self, email: &RenderedEmail) -> Result<(), NotifyError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Address(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        info!(to = %email.to, "Email sent");
        Ok(())
    }
}

/// Used when no mail credentials are configured; every send fails so the
/// completion path reports the missing notification.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _email: &RenderedEmail) -> Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}
