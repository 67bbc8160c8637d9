//! Wire-level traits for the mail protocols.
//!
//! The sync engine only talks to servers through these traits: a
//! [`MailConnector`] opens authenticated [`MailSession`]s for the incoming
//! side and a [`MailTransport`] submits outgoing messages. The production
//! implementations live in [`super::imap`] and [`super::smtp`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Address, FolderType, MessageId, ServerEndpoint};
use crate::mime::Part;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur while talking to a mail server.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Login rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Mailbox does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// SMTP submission failed.
    #[error("send failed: {0}")]
    Send(String),
}

impl ProviderError {
    /// Returns true for failures that happen while establishing a session.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Connection(_) | Self::Tls(_)
        )
    }
}

/// Plaintext login for one account.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A mailbox returned by `LIST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    /// Full mailbox name.
    pub name: String,
    /// Hierarchy delimiter, if the server reports one.
    pub delimiter: Option<String>,
    /// Role advertised through a SPECIAL-USE attribute.
    pub special_use: Option<FolderType>,
    /// False for `\Noselect` containers.
    pub selectable: bool,
}

/// State reported by `SELECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStatus {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub exists: u32,
}

/// System flags the engine mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags {
    pub seen: bool,
    pub flagged: bool,
    pub answered: bool,
    pub draft: bool,
}

/// Bytes of body text requested with each metadata fetch.
pub const PREVIEW_BYTES: usize = 2048;

/// One message from a `UID FETCH` response.
///
/// Metadata fetches fill `header`, `structure` and `preview`; body fetches
/// fill `body`.
#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: MessageFlags,
    pub internal_date: Option<DateTime<Utc>>,
    pub size: Option<u32>,
    pub header: Option<Vec<u8>>,
    pub structure: Option<Part>,
    /// At most [`PREVIEW_BYTES`] of the raw text after the header.
    pub preview: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

/// Opens authenticated sessions to an incoming mail server.
#[async_trait]
pub trait MailConnector: Send + Sync {
    /// Connects and logs in.
    async fn connect(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailSession>>;
}

/// An authenticated IMAP session.
#[async_trait]
pub trait MailSession: Send {
    /// Lists every mailbox (`LIST "" "*"`).
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>>;

    /// Selects a mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] when the server rejects the name.
    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    /// Fetches flags, dates, structure, headers and a body preview for
    /// `from_uid:*` in the selected mailbox.
    ///
    /// Servers answer `n:*` with the highest message even when it is below
    /// `n`, so callers must filter the result.
    async fn fetch_metadata(&mut self, from_uid: u32) -> Result<Vec<FetchedMessage>>;

    /// Fetches complete messages by UID from the selected mailbox.
    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>>;

    /// Ends the session.
    async fn logout(&mut self) -> Result<()>;
}

/// An email to be sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    /// Recipient addresses.
    pub to: Vec<Address>,
    /// CC addresses.
    pub cc: Vec<Address>,
    /// BCC addresses.
    pub bcc: Vec<Address>,
    /// Email subject.
    pub subject: String,
    /// Plain text body.
    pub body_text: String,
    /// HTML body (optional).
    pub body_html: Option<String>,
    /// Message-ID of the email being replied to.
    pub in_reply_to: Option<MessageId>,
    /// Reference chain of the conversation being replied to.
    pub references: Vec<MessageId>,
    /// Attachment data.
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingEmail {
    /// Creates a plain-text email with no attachments.
    pub fn new(to: Vec<Address>, subject: impl Into<String>, body_text: impl Into<String>) -> Self {
        Self {
            to,
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body_text: body_text.into(),
            body_html: None,
            in_reply_to: None,
            references: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

/// An attachment to be sent with an outgoing email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    /// Filename for the attachment.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Raw attachment data.
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

/// Submits finished messages to an outgoing server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Sends `message` through `endpoint`.
    async fn send(
        &self,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
        message: lettre::Message,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_email_serialization() {
        let mut email = OutgoingEmail::new(
            vec![Address::with_name("recipient@example.com", "Recipient")],
            "Test Subject",
            "Plain text body",
        );
        email.in_reply_to = Some(MessageId::from("original@example.com"));

        let json = serde_json::to_string(&email).unwrap();
        let deserialized: OutgoingEmail = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.subject, "Test Subject");
        assert_eq!(deserialized.to[0].email, "recipient@example.com");
        assert_eq!(deserialized.in_reply_to, email.in_reply_to);
    }

    #[test]
    fn outgoing_attachment_serialization() {
        let attachment = OutgoingAttachment {
            filename: "document.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            data: vec![0x25, 0x50, 0x44, 0x46],
        };

        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains("\"JVBERg==\""));
        let deserialized: OutgoingAttachment = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.data, vec![0x25, 0x50, 0x44, 0x46]);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("user@example.com", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn provider_error_classification() {
        assert!(ProviderError::Tls("bad cert".to_string()).is_connect_failure());
        assert!(ProviderError::Authentication("no".to_string()).is_connect_failure());
        assert!(!ProviderError::NotFound("Archive".to_string()).is_connect_failure());
        assert_eq!(
            ProviderError::Authentication("token expired".to_string()).to_string(),
            "authentication failed: token expired"
        );
    }
}
