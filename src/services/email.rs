//! Email service for account mails (password reset, address verification)

use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("SMTP host not configured")]
    NotConfigured,

    #[error("Invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to send email: {0}")]
    Transport(String),
}

/// SMTP sender
pub struct EmailService {
    config: SmtpConfig,
}

impl EmailService {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        self.config
            .host
            .as_deref()
            .is_some_and(|host| !host.is_empty())
    }

    /// Send an HTML mail.
    pub async fn send_html(&self, to: &str, subject: &str, html: String) -> Result<(), EmailError> {
        let host = match self.config.host.as_deref() {
            Some(host) if !host.is_empty() => host,
            _ => {
                tracing::warn!(to, subject, "SMTP not configured, email not sent");
                return Err(EmailError::NotConfigured);
            }
        };

        let email = Message::builder()
            .from(parse_mailbox(&self.config.from_email)?)
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let builder = if !self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else if self.config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
        };

        let builder = match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };
        let mailer = builder.port(self.config.port).build();

        mailer
            .send(email)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        tracing::info!(to, subject, "Email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox, EmailError> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        EmailError::InvalidAddress {
            address: address.to_string(),
            message: e.to_string(),
        }
    })
}
