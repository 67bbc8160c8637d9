//! Folder domain types.
//!
//! A folder is the local mirror of one remote IMAP mailbox together with the
//! UID checkpoint used for incremental sync.

use serde::{Deserialize, Serialize};

use super::{AccountId, FolderId};

/// A locally mirrored mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    /// Unique identifier for this folder.
    pub id: FolderId,
    /// Account the folder belongs to.
    pub account_id: AccountId,
    /// Human readable name (last hierarchy segment).
    pub name: String,
    /// Full mailbox name as known to the server.
    pub remote_name: String,
    /// Role of the folder.
    pub folder_type: FolderType,
    /// Parent folder in the hierarchy.
    pub parent_id: Option<FolderId>,
    /// UIDVALIDITY recorded at the last checkpoint (0 when never synced).
    pub uid_validity: u32,
    /// UIDNEXT recorded at the last checkpoint (0 when never synced).
    pub uid_next: u32,
    /// Number of unread messages stored locally.
    pub unread_count: u32,
    /// Number of messages stored locally.
    pub total_count: u32,
}

impl Folder {
    /// Creates a folder with an empty sync checkpoint.
    pub fn new(account_id: AccountId, remote_name: impl Into<String>, folder_type: FolderType) -> Self {
        let remote_name = remote_name.into();
        Self {
            id: FolderId::generate(),
            account_id,
            name: display_name(&remote_name, None),
            remote_name,
            folder_type,
            parent_id: None,
            uid_validity: 0,
            uid_next: 0,
            unread_count: 0,
            total_count: 0,
        }
    }
}

/// Role of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Archive,
    /// Aggregate view of every message (`\All`).
    All,
    Custom,
}

impl FolderType {
    /// Returns the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Spam => "spam",
            Self::Archive => "archive",
            Self::All => "all",
            Self::Custom => "custom",
        }
    }

    /// Parses a stored folder type, defaulting to [`FolderType::Custom`].
    pub fn parse(s: &str) -> Self {
        match s {
            "inbox" => Self::Inbox,
            "sent" => Self::Sent,
            "drafts" => Self::Drafts,
            "trash" => Self::Trash,
            "spam" => Self::Spam,
            "archive" => Self::Archive,
            "all" => Self::All,
            _ => Self::Custom,
        }
    }

    /// Classifies a mailbox from its well-known name.
    pub fn from_remote_name(name: &str) -> Self {
        let leaf = name
            .rsplit(|c: char| c == '/' || c == '.')
            .next()
            .unwrap_or(name)
            .to_lowercase();

        if name.eq_ignore_ascii_case("INBOX") {
            return Self::Inbox;
        }
        match leaf.as_str() {
            "sent" | "sent mail" | "sent items" | "sent messages" => Self::Sent,
            "drafts" | "draft" => Self::Drafts,
            "trash" | "deleted items" | "deleted messages" | "bin" => Self::Trash,
            "spam" | "junk" | "junk e-mail" | "junk email" => Self::Spam,
            "archive" | "archives" => Self::Archive,
            "all mail" => Self::All,
            _ => Self::Custom,
        }
    }
}

/// Returns the last hierarchy segment of a mailbox name.
pub fn display_name(remote_name: &str, delimiter: Option<&str>) -> String {
    match delimiter {
        Some(d) if !d.is_empty() => remote_name
            .rsplit(d)
            .next()
            .unwrap_or(remote_name)
            .to_string(),
        _ => remote_name.to_string(),
    }
}
