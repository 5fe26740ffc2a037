//! Email sending via pooled SMTP.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("failed to send email: {0}")]
    SendFailed(String),
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
    #[error("smtp connection failed: {0}")]
    ConnectionFailed(String),
}

pub type Result<T> = std::result::Result<T, MailerError>;

use crate::Config;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};

/// Mailer service with connection pooling
#[derive(Clone, Debug)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl Mailer {
    pub fn new(config: &Config) -> Result<Self> {
        let smtp_host = &config.smtp_host;
        let smtp_port = config.smtp_port;

        let transport = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(|e| {
                    MailerError::ConnectionFailed(format!("failed to create transport: {e}"))
                })?
                .port(smtp_port)
                .credentials(Credentials::new(username.clone(), password.clone()))
                .pool_config(
                    lettre::transport::smtp::PoolConfig::new().max_size(config.smtp_pool_size),
                )
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
                .port(smtp_port)
                .pool_config(
                    lettre::transport::smtp::PoolConfig::new().max_size(config.smtp_pool_size),
                )
                .build()
        };

        Ok(Self {
            transport,
            from: config.smtp_from.clone(),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| MailerError::InvalidAddress(format!("invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| MailerError::InvalidAddress(format!("invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailerError::SendFailed(format!("failed to build message: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailerError::SendFailed(format!("failed to send email: {e}")))?;

        tracing::info!(%to, "email sent");

        Ok(())
    }
}
