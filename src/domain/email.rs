//! Email domain types.
//!
//! Represents individual email messages and related structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, AttachmentId, EmailId, FolderId, MessageId, ThreadId};

/// An individual email message mirrored from an IMAP folder.
///
/// `(remote_folder_id, uid)` is unique. The body fields stay empty until the
/// message is opened and the on-demand body fetcher fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier for this email.
    pub id: EmailId,
    /// Account this email belongs to.
    pub account_id: AccountId,
    /// Folder the email is filed under locally.
    pub folder_id: FolderId,
    /// Mailbox the email was synced from. Differs from `folder_id` once a
    /// rule has moved the message.
    pub remote_folder_id: FolderId,
    /// IMAP UID within the remote folder's current UIDVALIDITY epoch.
    pub uid: u32,
    /// Thread (conversation) this email belongs to.
    pub thread_id: ThreadId,
    /// RFC 5322 Message-ID header, normalized.
    pub message_id: MessageId,
    /// Message-ID of the email this is replying to.
    pub in_reply_to: Option<MessageId>,
    /// Chain of Message-IDs for threading, root first.
    pub references: Vec<MessageId>,
    /// Sender address.
    pub from: Address,
    /// Primary recipient addresses.
    pub to: Vec<Address>,
    /// Carbon copy recipient addresses.
    pub cc: Vec<Address>,
    /// Reply-To address, if different from the sender.
    pub reply_to: Option<Address>,
    /// Email subject line.
    pub subject: Option<String>,
    /// Plain text body content.
    pub body_text: Option<String>,
    /// HTML body content.
    pub body_html: Option<String>,
    /// Short preview of the email content.
    pub snippet: String,
    /// Date and time the server received the email.
    pub date: DateTime<Utc>,
    /// Whether the email has been read.
    pub is_read: bool,
    /// Whether the email is starred/flagged.
    pub is_starred: bool,
    /// Whether the email has been answered.
    pub is_answered: bool,
    /// Whether this is a draft.
    pub is_draft: bool,
    /// Whether the structure advertises attachments.
    pub has_attachments: bool,
    /// Whether the full body has been downloaded.
    pub body_fetched: bool,
    /// File attachments.
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Returns every distinct address on the email, sender first.
    pub fn participants(&self) -> Vec<Address> {
        let mut out = vec![self.from.clone()];
        for addr in self.to.iter().chain(self.cc.iter()) {
            if !out.iter().any(|a| a.email.eq_ignore_ascii_case(&addr.email)) {
                out.push(addr.clone());
            }
        }
        out
    }
}

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// A file attachment on an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique identifier for this attachment.
    pub id: AttachmentId,
    /// Email the attachment belongs to.
    pub email_id: EmailId,
    /// Original or generated filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Content-ID used by `cid:` references in HTML bodies.
    pub content_id: Option<String>,
    /// Whether this is an inline attachment (e.g., embedded image).
    pub is_inline: bool,
    /// Blob store key, set once the content has been cached.
    pub storage_key: Option<String>,
}
