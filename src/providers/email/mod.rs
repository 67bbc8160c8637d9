//! Mail protocol providers.
//!
//! This module contains the wire traits the sync engine is written against
//! and their production implementations:
//!
//! - [`ImapConnector`] - IMAP over rustls (implicit TLS or STARTTLS)
//! - [`SmtpMailer`] - SMTP submission through lettre
//! - [`MemoryMailServer`] - in-process server speaking both traits
//!
//! # Architecture
//!
//! Services never touch `async-imap` or `lettre` directly. They hold an
//! `Arc<dyn MailConnector>` and an `Arc<dyn MailTransport>`, which lets the
//! tests drive the whole engine against in-process fakes.

mod imap;
mod memory;
mod smtp;
mod traits;

pub use imap::{ImapConnector, ImapMailSession};
pub use memory::{MemoryMailServer, MemorySession, ServerStats};
pub use smtp::{build_message, generate_message_id, SmtpMailer};
pub use traits::{
    Credentials, FetchedMessage, MailConnector, MailSession, MailTransport, MailboxStatus,
    MessageFlags, OutgoingAttachment, OutgoingEmail, ProviderError, RemoteFolder, Result,
    PREVIEW_BYTES,
};
