//! Outbound transport abstraction and the SMTP implementation.
//!
//! A `TransportProvider` opens a transport session from a credential bundle;
//! a `Transport` sends one message at a time. The worker depends only on the
//! traits, so tests substitute a recording fake and no test ever touches a
//! network socket.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use super::CredentialBundle;
use crate::error::{ErrorCode, Result, SendwaveError};

/// A connected outbound mail session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one plain-text message.
    async fn send(&self, from: &str, to: &str, subject: &str, text: &str) -> Result<()>;
}

/// Opens transport sessions from sending credentials.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Open a session authenticated as the given credential bundle.
    async fn connect(&self, credentials: &CredentialBundle) -> Result<Arc<dyn Transport>>;
}

/// SMTP provider using lettre with STARTTLS and connection pooling.
pub struct SmtpTransportProvider;

impl SmtpTransportProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SmtpTransportProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportProvider for SmtpTransportProvider {
    async fn connect(&self, credentials: &CredentialBundle) -> Result<Arc<dyn Transport>> {
        let host = credentials.provider.smtp_host();
        let creds = Credentials::new(credentials.address.clone(), credentials.secret.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| {
                SendwaveError::with_internal(
                    ErrorCode::TransportConnectFailed,
                    format!("Failed to configure SMTP relay for {}", host),
                    e.to_string(),
                )
            })?
            .credentials(creds)
            .build();

        tracing::debug!(host, address = %credentials.address, "SMTP transport opened");
        Ok(Arc::new(SmtpTransport { transport }))
    }
}

/// One pooled lettre SMTP session.
struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, from: &str, to: &str, subject: &str, text: &str) -> Result<()> {
        let message = Message::builder()
            .from(parse_mailbox(from)?)
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())
            .map_err(|e| {
                SendwaveError::with_internal(
                    ErrorCode::TransportSendFailed,
                    "Failed to build outbound message",
                    e.to_string(),
                )
            })?;

        self.transport.send(message).await.map_err(|e| {
            SendwaveError::with_internal(
                ErrorCode::TransportSendFailed,
                format!("Failed to send message to {}", to),
                e.to_string(),
            )
        })?;

        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        SendwaveError::with_internal(
            ErrorCode::InvalidFormat,
            format!("'{}' is not a valid email address", address),
            e.to_string(),
        )
    })
}
