use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{EmailError, MailTransport, OutgoingEmail};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    /// Unset until `smtp.from` is configured; sends fail until then.
    from: Option<Mailbox>,
}

impl SmtpMailer {
    /// Plain SMTP by default (local relays, MailHog); STARTTLS when
    /// `starttls` is set. Credentials are only sent when both are present.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, EmailError> {
        let from = match config.from.trim() {
            "" => None,
            address => Some(parse_mailbox(address)?),
        };

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);
        if !config.username.is_empty() && !config.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|source| EmailError::Address {
            address: address.to_string(),
            source,
        })
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        let content_type = if email.html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };
        let from = self.from.clone().ok_or(EmailError::MissingSender)?;
        let message = Message::builder()
            .from(from)
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject.as_str())
            .header(content_type)
            .body(email.body.clone())?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// SendGrid is accepted as a provider name but has no transport yet.
pub struct SendGridMailer;

#[async_trait]
impl MailTransport for SendGridMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), EmailError> {
        Err(EmailError::NotImplemented("SendGrid"))
    }
}
