//! Fallback relay: resend an undeliverable message to a secondary SMTP server.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::RelayError;
use crate::routing::normalize_recipient;

/// Secondary SMTP server configuration.
#[derive(Debug)]
pub struct FallbackConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Upgrade the session with STARTTLS before authenticating.
    pub starttls: bool,
}

/// Something that can resend a raw message with an explicit envelope.
#[async_trait]
pub trait SecondaryRelay: Send + Sync {
    async fn send(&self, from: &str, recipients: &[String], raw: &[u8]) -> Result<(), RelayError>;
}

/// [`SecondaryRelay`] over SMTP via lettre.
pub struct SmtpRelay {
    config: FallbackConfig,
}

impl SmtpRelay {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, RelayError> {
        let builder = if self.config.starttls {
            SmtpTransport::starttls_relay(&self.config.host)
                .map_err(|e| RelayError::Transport(format!("STARTTLS setup failed: {e}")))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.host)
        };

        let mut builder = builder.port(self.config.port);
        if let Some(user) = &self.config.username {
            let password = self
                .config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(user.clone(), password));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl SecondaryRelay for SmtpRelay {
    async fn send(&self, from: &str, recipients: &[String], raw: &[u8]) -> Result<(), RelayError> {
        let envelope = build_envelope(from, recipients)?;
        let transport = self.transport()?;
        let raw = raw.to_vec();

        tokio::task::spawn_blocking(move || transport.send_raw(&envelope, &raw))
            .await
            .map_err(|e| RelayError::Task(e.to_string()))?
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// Build an SMTP envelope from a sender and envelope-formatted recipients.
pub fn build_envelope(from: &str, recipients: &[String]) -> Result<Envelope, RelayError> {
    let sender = parse_address(from)?;
    let to = recipients
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>, _>>()?;

    Envelope::new(Some(sender), to).map_err(|e| RelayError::Envelope(e.to_string()))
}

fn parse_address(raw: &str) -> Result<lettre::Address, RelayError> {
    let trimmed = normalize_recipient(raw);
    trimmed.parse().map_err(|e| RelayError::InvalidAddress {
        address: raw.to_string(),
        reason: format!("{e}"),
    })
}

/// Last-resort sink for items the chat platform refused.
///
/// A no-op when no secondary relay is configured. Failures are logged and
/// never retried.
#[derive(Clone, Default)]
pub struct FallbackRelay {
    relay: Option<Arc<dyn SecondaryRelay>>,
}

impl FallbackRelay {
    pub fn new(relay: Arc<dyn SecondaryRelay>) -> Self {
        Self { relay: Some(relay) }
    }

    pub fn disabled() -> Self {
        Self { relay: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.relay.is_some()
    }

    /// Resend `raw` unmodified with the original envelope.
    pub async fn relay(&self, from: &str, recipients: &[String], raw: &[u8]) {
        let Some(relay) = &self.relay else {
            return;
        };

        tracing::info!(from, recipients = ?recipients, "Sending to fallback relay");
        match relay.send(from, recipients, raw).await {
            Ok(()) => tracing::info!(from, "Fallback relay accepted message"),
            Err(e) => tracing::error!(from, error = %e, "Fallback mail send failed"),
        }
    }
}
