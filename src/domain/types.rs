//! Core identifier types for domain entities.
//!
//! These newtype wrappers provide type safety for entity identifiers,
//! preventing accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generates a new random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id! {
    /// Unique identifier for an email account.
    AccountId
}

string_id! {
    /// Unique identifier for a locally mirrored folder.
    FolderId
}

string_id! {
    /// Unique identifier for a locally stored email.
    EmailId
}

string_id! {
    /// Conversation key shared by every message of a thread.
    ThreadId
}

string_id! {
    /// Unique identifier for a stored attachment record.
    AttachmentId
}

string_id! {
    /// Unique identifier for a label.
    LabelId
}

string_id! {
    /// Unique identifier for a filter rule.
    RuleId
}

string_id! {
    /// Handle for a queued (undoable) outgoing send.
    PendingSendId
}

/// RFC 5322 Message-ID header value.
///
/// This is the unique identifier assigned by the originating mail system,
/// used for threading via In-Reply-To and References headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Returns the identifier with surrounding whitespace and angle brackets removed.
    pub fn normalized(&self) -> String {
        normalize_message_id(&self.0)
    }

    /// Parses a whitespace separated list of message identifiers as found in
    /// `References` and `In-Reply-To` headers.
    pub fn parse_list(raw: &str) -> Vec<MessageId> {
        raw.split(|c: char| c.is_whitespace() || c == ',' || c == '>')
            .map(normalize_message_id)
            .filter(|id| !id.is_empty())
            .map(MessageId)
            .collect()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Strips angle brackets and whitespace from a Message-ID.
pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}
