use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};

use super::digest::render_html;

/// A message body written in markdown; sent as plain text with an HTML
/// alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub markdown: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;

    /// Connects and authenticates without sending anything.
    async fn test_connection(&self) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig, timeout: Duration) -> Result<Self> {
        let from_address = if config.from.is_empty() {
            &config.user
        } else {
            &config.from
        };
        let from: Mailbox = from_address.parse()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.password.clone()))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, from })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let html = render_html(&email.markdown);
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(email.markdown.clone(), html))?;
        Ok(message)
    }

    pub fn sender(&self) -> String {
        self.from.email.to_string()
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport.send(message).await?;
        tracing::info!("Email sent to {}", email.to);
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(AppError::Email("SMTP server did not accept the connection".to_string()))
        }
    }
}
