use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MailConfig;

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), DeliveryError>;
}

/// Plain-text SMTP sender. The blocking lettre transport runs on the
/// blocking pool so request tasks are not stalled by a slow relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg.from.parse().context("parse MAIL_FROM")?;

        let mut builder = if cfg.starttls {
            SmtpTransport::starttls_relay(&cfg.host).context("build STARTTLS relay")?
        } else {
            SmtpTransport::builder_dangerous(&cfg.host)
        };
        builder = builder
            .port(cfg.port)
            .timeout(Some(std::time::Duration::from_secs(10)));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: Email) -> Result<Message, DeliveryError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError(format!("invalid recipient: {e}")))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| DeliveryError(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), DeliveryError> {
        let to = email.to.clone();
        let message = self.build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError(format!("mail task failed: {e}")))?
            .map_err(|e| {
                warn!(error = %e, "smtp send failed");
                DeliveryError(e.to_string())
            })?;

        debug!(%to, "email sent");
        Ok(())
    }
}

#[cfg(test)]
pub use testing::{FailingMailer, RecordingMailer};
