pub mod smtp;

pub use smtp::SmtpMailer;

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("no mail transport configured")]
    TransportUnavailable,
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Outbound mail. Timeouts are the transport's business.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError>;
}
