//! Thread domain types.
//!
//! Threads are not stored; they are derived by grouping messages on their
//! thread id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Address, Email, ThreadId};

/// A complete conversation with all of its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Conversation key.
    pub id: ThreadId,
    /// Account this thread belongs to.
    pub account_id: AccountId,
    /// Thread subject (from first message).
    pub subject: Option<String>,
    /// All participants in the thread.
    pub participants: Vec<Address>,
    /// All messages in the thread, ordered by date.
    pub messages: Vec<Email>,
    /// Number of unread messages.
    pub unread_count: u32,
}

impl Thread {
    /// Builds a thread from its messages, which must already be date ordered.
    pub fn from_messages(id: ThreadId, account_id: AccountId, messages: Vec<Email>) -> Self {
        let subject = messages.iter().find_map(|m| m.subject.clone());
        let mut participants: Vec<Address> = Vec::new();
        for message in &messages {
            for addr in message.participants() {
                if !participants
                    .iter()
                    .any(|p| p.email.eq_ignore_ascii_case(&addr.email))
                {
                    participants.push(addr);
                }
            }
        }
        let unread_count = messages.iter().filter(|m| !m.is_read).count() as u32;

        Self {
            id,
            account_id,
            subject,
            participants,
            messages,
            unread_count,
        }
    }

    /// Date of the most recent message.
    pub fn last_message_date(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.date).max()
    }
}

/// A lightweight summary of a thread for list display.
///
/// Contains only the essential information needed for rendering
/// in the message list, avoiding the cost of loading full message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Conversation key.
    pub id: ThreadId,
    /// Account this thread belongs to.
    pub account_id: AccountId,
    /// Thread subject.
    pub subject: Option<String>,
    /// Short preview of the latest message.
    pub snippet: String,
    /// Sender of the latest message.
    pub from: Address,
    /// Date of the most recent message.
    pub last_message_date: DateTime<Utc>,
    /// Total number of messages in the thread.
    pub message_count: u32,
    /// Number of unread messages.
    pub unread_count: u32,
    /// Whether any message in the thread is starred.
    pub is_starred: bool,
}

impl ThreadSummary {
    /// Returns true if the thread has unread messages.
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}
