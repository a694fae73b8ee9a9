use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::{authentication::Credentials, AsyncSmtpTransport},
    AsyncTransport, Tokio1Executor,
};

use super::{MailError, Mailer};
use crate::config::SmtpConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|_| MailError::InvalidAddress(cfg.from.clone()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| MailError::DeliveryFailed(format!("smtp relay '{}': {e}", cfg.host)))?
            .port(cfg.port)
            .timeout(Some(SMTP_TIMEOUT));

        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

/// Build a plain-text message; every recipient must be a valid mailbox.
pub fn build_message(from: &Mailbox, to: &[String], subject: &str, body: &str) -> Result<Message, MailError> {
    let mut builder = Message::builder().from(from.clone()).subject(subject);
    for addr in to {
        let mailbox: Mailbox = addr
            .parse()
            .map_err(|_| MailError::InvalidAddress(addr.clone()))?;
        builder = builder.to(mailbox);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| MailError::DeliveryFailed(e.to_string()))
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        if to.is_empty() {
            return Err(MailError::InvalidAddress(String::new()));
        }
        let message = build_message(&self.from, to, subject, body)?;
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| MailError::DeliveryFailed(e.to_string()))
    }
}
