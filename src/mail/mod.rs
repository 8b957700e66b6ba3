//! Mail domain types: recipients, sending credentials, providers, and the
//! inbound send-mail request.

pub mod service;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorCode, Result, SendwaveError};

pub use service::MailService;
pub use transport::{SmtpTransportProvider, Transport, TransportProvider};

// ═══════════════════════════════════════════════════════════════════════════════
// Recipient Context
// ═══════════════════════════════════════════════════════════════════════════════

/// One outbound message: recipient address, subject, and body.
///
/// Immutable once constructed; owned exclusively by the dispatch job that
/// contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientContext {
    /// Recipient email address.
    ///
    /// The wire key is `receipient` - the misspelling is part of the
    /// reference wire contract and must not be corrected.
    #[serde(rename = "receipient")]
    pub recipient: String,

    /// Message subject (may be empty)
    pub subject: String,

    /// Message body
    pub message: String,
}

impl RecipientContext {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mail Provider
// ═══════════════════════════════════════════════════════════════════════════════

/// Supported outbound mail services.
///
/// Serde names match the service strings accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailProvider {
    #[serde(rename = "1und1")]
    OneUndOne,
    Gmail,
    Hotmail,
    #[serde(rename = "iCloud")]
    ICloud,
    Yahoo,
    Zoho,
    #[serde(rename = "AOL")]
    Aol,
    #[serde(rename = "DebugMail.io")]
    DebugMail,
    DynectEmail,
    FastMail,
    #[serde(rename = "hot.ee")]
    HotEe,
    #[serde(rename = "mail.ee")]
    MailEe,
    #[serde(rename = "Mail.ru")]
    MailRu,
    Yandex,
    Naver,
    #[serde(rename = "QQ")]
    Qq,
    #[serde(rename = "QQex")]
    QqEx,
    SendGrid,
    Mailgun,
    Mailjet,
    Postmark,
    #[serde(rename = "SES")]
    Ses,
    Sparkpost,
    Mandrill,
    SendCloud,
    GandiMail,
    Godaddy,
    GodaddyAsia,
    GodaddyEurope,
}

impl MailProvider {
    /// SMTP relay host for this provider.
    pub const fn smtp_host(&self) -> &'static str {
        match self {
            Self::OneUndOne => "smtp.1und1.de",
            Self::Gmail => "smtp.gmail.com",
            Self::Hotmail => "smtp-mail.outlook.com",
            Self::ICloud => "smtp.mail.me.com",
            Self::Yahoo => "smtp.mail.yahoo.com",
            Self::Zoho => "smtp.zoho.com",
            Self::Aol => "smtp.aol.com",
            Self::DebugMail => "debugmail.io",
            Self::DynectEmail => "smtp.dynect.net",
            Self::FastMail => "smtp.fastmail.com",
            Self::HotEe => "mail.hot.ee",
            Self::MailEe => "smtp.mail.ee",
            Self::MailRu => "smtp.mail.ru",
            Self::Yandex => "smtp.yandex.com",
            Self::Naver => "smtp.naver.com",
            Self::Qq => "smtp.qq.com",
            Self::QqEx => "smtp.exmail.qq.com",
            Self::SendGrid => "smtp.sendgrid.net",
            Self::Mailgun => "smtp.mailgun.org",
            Self::Mailjet => "in-v3.mailjet.com",
            Self::Postmark => "smtp.postmarkapp.com",
            Self::Ses => "email-smtp.us-east-1.amazonaws.com",
            Self::Sparkpost => "smtp.sparkpostmail.com",
            Self::Mandrill => "smtp.mandrillapp.com",
            Self::SendCloud => "smtp.sendcloud.net",
            Self::GandiMail => "mail.gandi.net",
            Self::Godaddy => "smtpout.secureserver.net",
            Self::GodaddyAsia => "smtpout.asia.secureserver.net",
            Self::GodaddyEurope => "smtpout.europe.secureserver.net",
        }
    }
}

impl fmt::Display for MailProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Credential Bundle
// ═══════════════════════════════════════════════════════════════════════════════

/// Sending identity used to open an outbound transport.
///
/// Exists only for the lifetime of one dispatch job; it is persisted in the
/// queue's backing store until the job is consumed, so the queue store itself
/// is a trust boundary for secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// Mail service to relay through
    pub provider: MailProvider,
    /// Sending email address / login
    pub address: String,
    /// Password or app token
    pub secret: String,
}

impl CredentialBundle {
    pub fn new(provider: MailProvider, address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            provider,
            address: address.into(),
            secret: secret.into(),
        }
    }
}

// The secret must never reach logs in plaintext.
impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("provider", &self.provider)
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Send Mail Request
// ═══════════════════════════════════════════════════════════════════════════════

/// Inbound "send mail" body as received from the mail controller.
///
/// Wire shape: `{ service, email, password, data: [{ receipient, subject, message }] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMailRequest {
    /// Mail service name (e.g. "Gmail")
    pub service: MailProvider,
    /// Sending email address / login
    pub email: String,
    /// Password or app token
    pub password: String,
    /// Ordered batch of messages to deliver
    pub data: Vec<RecipientContext>,
}

impl SendMailRequest {
    /// Split the request into its credential bundle and recipient batch.
    pub fn into_parts(self) -> (CredentialBundle, Vec<RecipientContext>) {
        (
            CredentialBundle::new(self.service, self.email, self.password),
            self.data,
        )
    }
}

/// Check that an address is syntactically a valid email.
pub(crate) fn validate_email(address: &str) -> Result<()> {
    address.parse::<lettre::Address>().map_err(|e| {
        SendwaveError::with_internal(
            ErrorCode::InvalidFormat,
            format!("'{}' is not a valid email address", address),
            e.to_string(),
        )
    })?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
