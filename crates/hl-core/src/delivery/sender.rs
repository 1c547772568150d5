//! Sender credentials and the mail transport seam.

use hl_common::{Classify, ErrorClass};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One entry of the sender fallback chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCredential {
    pub host: String,
    pub port: u16,
    /// Login and `From` address.
    pub identity: String,
    pub secret: String,
}

impl SenderCredential {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        identity: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Template entries that were never filled in.
    pub fn is_placeholder(&self) -> bool {
        self.identity.contains("your_") || self.secret.contains("REPLACE")
    }
}

impl fmt::Debug for SenderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for SenderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.identity, self.host, self.port)
    }
}

/// A message with a single attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to compose message: {0}")]
    Compose(String),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("send rejected: {0}")]
    Rejected(String),
}

impl Classify for TransportError {
    fn class(&self) -> ErrorClass {
        match self {
            TransportError::Address { .. } => ErrorClass::Configuration,
            TransportError::Compose(_) => ErrorClass::Fatal,
            TransportError::Smtp(_) | TransportError::Rejected(_) => ErrorClass::Transient,
        }
    }
}

/// Sends one message through one sender.
pub trait Transport: Send + Sync {
    fn send(&self, sender: &SenderCredential, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Implicit-TLS SMTP submission.
#[derive(Debug, Clone)]
pub struct SmtpsTransport {
    timeout: Duration,
}

impl SmtpsTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse().map_err(|source| TransportError::Address {
        address: address.to_string(),
        source,
    })
}

/// Build the MIME message for `message` sent by `sender`.
pub fn compose(sender: &SenderCredential, message: &OutgoingMessage) -> Result<Message, TransportError> {
    let content_type = ContentType::parse("application/zip")
        .map_err(|e| TransportError::Compose(e.to_string()))?;
    let attachment = Attachment::new(message.attachment_name.clone())
        .body(message.attachment.clone(), content_type);

    Message::builder()
        .from(mailbox(&sender.identity)?)
        .to(mailbox(&message.to)?)
        .subject(message.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(message.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| TransportError::Compose(e.to_string()))
}

impl Transport for SmtpsTransport {
    fn send(&self, sender: &SenderCredential, message: &OutgoingMessage) -> Result<(), TransportError> {
        use lettre::Transport as _;

        let email = compose(sender, message)?;
        let mailer = SmtpTransport::relay(&sender.host)?
            .port(sender.port)
            .credentials(Credentials::new(sender.identity.clone(), sender.secret.clone()))
            .timeout(Some(self.timeout))
            .build();
        mailer.send(&email)?;
        Ok(())
    }
}
