//! In-process mail server for tests and offline use.
//!
//! Implements both wire traits over shared in-memory mailboxes and keeps
//! counters of the requests it served, so callers can assert on batching.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Credentials, FetchedMessage, MailConnector, MailSession, MailTransport, MailboxStatus,
    MessageFlags, ProviderError, RemoteFolder, Result, PREVIEW_BYTES,
};
use crate::domain::{FolderType, ServerEndpoint};
use crate::mime;

const DELIMITER: &str = "/";

/// Requests served so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Successful logins.
    pub logins: usize,
    /// Rejected or failed connection attempts.
    pub failed_connects: usize,
    /// `SELECT` commands, by mailbox.
    pub selects: Vec<String>,
    /// Metadata `UID FETCH` commands, by starting UID.
    pub metadata_fetches: Vec<u32>,
    /// Body `UID FETCH` commands, by UID set.
    pub body_fetches: Vec<Vec<u32>>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    raw: Vec<u8>,
    flags: MessageFlags,
    internal_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Mailbox {
    uid_validity: u32,
    uid_next: u32,
    special_use: Option<FolderType>,
    messages: BTreeMap<u32, StoredMessage>,
}

#[derive(Debug, Default)]
struct ServerState {
    mailboxes: BTreeMap<String, Mailbox>,
    password: Option<String>,
    failing_connects: usize,
    failing_sends: bool,
    sent: Vec<Vec<u8>>,
    stats: ServerStats,
}

/// Shared in-memory IMAP and SMTP server.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryMailServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty mailbox.
    pub fn add_mailbox(&self, name: &str, uid_validity: u32, special_use: Option<FolderType>) {
        self.state().mailboxes.insert(
            name.to_string(),
            Mailbox {
                uid_validity,
                uid_next: 1,
                special_use,
                messages: BTreeMap::new(),
            },
        );
    }

    /// Appends a raw message and returns its UID.
    pub fn append(&self, mailbox: &str, raw: impl Into<Vec<u8>>) -> Option<u32> {
        let mut state = self.state();
        let mailbox = state.mailboxes.get_mut(mailbox)?;
        let uid = mailbox.uid_next;
        mailbox.uid_next += 1;
        mailbox.messages.insert(
            uid,
            StoredMessage {
                raw: raw.into(),
                flags: MessageFlags::default(),
                internal_date: Utc::now(),
            },
        );
        Some(uid)
    }

    /// Sets the flags of a stored message.
    pub fn set_flags(&self, mailbox: &str, uid: u32, flags: MessageFlags) {
        if let Some(message) = self
            .state()
            .mailboxes
            .get_mut(mailbox)
            .and_then(|m| m.messages.get_mut(&uid))
        {
            message.flags = flags;
        }
    }

    /// Starts a new UIDVALIDITY epoch: the mailbox keeps its messages but
    /// renumbers them from 1.
    pub fn reset_uid_validity(&self, mailbox: &str, uid_validity: u32) {
        if let Some(mailbox) = self.state().mailboxes.get_mut(mailbox) {
            let messages: Vec<StoredMessage> =
                std::mem::take(&mut mailbox.messages).into_values().collect();
            mailbox.uid_validity = uid_validity;
            mailbox.uid_next = 1;
            for message in messages {
                mailbox.messages.insert(mailbox.uid_next, message);
                mailbox.uid_next += 1;
            }
        }
    }

    /// Rejects logins whose password differs from `password`.
    pub fn require_password(&self, password: &str) {
        self.state().password = Some(password.to_string());
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// Makes every SMTP submission fail.
    pub fn fail_sends(&self, failing: bool) {
        self.state().failing_sends = failing;
    }

    /// Requests served so far.
    pub fn stats(&self) -> ServerStats {
        self.state().stats.clone()
    }

    /// Messages accepted over SMTP, as transmitted.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }
}

#[async_trait]
impl MailConnector for MemoryMailServer {
    async fn connect(
        &self,
        _endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailSession>> {
        let mut state = self.state();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            state.stats.failed_connects += 1;
            return Err(ProviderError::Connection("connection reset".to_string()));
        }
        if let Some(expected) = &state.password {
            if expected != &credentials.password {
                state.stats.failed_connects += 1;
                return Err(ProviderError::Authentication(
                    "invalid credentials".to_string(),
                ));
            }
        }
        state.stats.logins += 1;
        Ok(Box::new(MemorySession {
            server: self.clone(),
            selected: None,
        }))
    }
}

#[async_trait]
impl MailTransport for MemoryMailServer {
    async fn send(
        &self,
        _endpoint: &ServerEndpoint,
        _credentials: &Credentials,
        message: lettre::Message,
    ) -> Result<()> {
        let mut state = self.state();
        if state.failing_sends {
            return Err(ProviderError::Send("554 rejected".to_string()));
        }
        state.sent.push(message.formatted());
        Ok(())
    }
}

/// Session handed out by [`MemoryMailServer`].
pub struct MemorySession {
    server: MemoryMailServer,
    selected: Option<String>,
}

impl MemorySession {
    fn selected(&self) -> Result<&str> {
        self.selected
            .as_deref()
            .ok_or_else(|| ProviderError::Protocol("no mailbox selected".to_string()))
    }
}

fn header_end(raw: &[u8]) -> usize {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2))
        .unwrap_or(raw.len())
}

fn header_block(raw: &[u8]) -> Vec<u8> {
    raw[..header_end(raw)].to_vec()
}

/// `BODY[TEXT]<0.PREVIEW_BYTES>`.
fn preview_block(raw: &[u8]) -> Vec<u8> {
    let text = &raw[header_end(raw)..];
    text[..text.len().min(PREVIEW_BYTES)].to_vec()
}

#[async_trait]
impl MailSession for MemorySession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>> {
        let state = self.server.state();
        Ok(state
            .mailboxes
            .iter()
            .map(|(name, mailbox)| RemoteFolder {
                name: name.clone(),
                delimiter: Some(DELIMITER.to_string()),
                special_use: mailbox.special_use,
                selectable: true,
            })
            .collect())
    }

    async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let status = {
            let mut state = self.server.state();
            let found = state.mailboxes.get(mailbox).map(|m| MailboxStatus {
                uid_validity: m.uid_validity,
                uid_next: m.uid_next,
                exists: m.messages.len() as u32,
            });
            let status = found.ok_or_else(|| ProviderError::NotFound(mailbox.to_string()))?;
            state.stats.selects.push(mailbox.to_string());
            status
        };
        self.selected = Some(mailbox.to_string());
        Ok(status)
    }

    async fn fetch_metadata(&mut self, from_uid: u32) -> Result<Vec<FetchedMessage>> {
        let selected = self.selected()?.to_string();
        let mut state = self.server.state();
        state.stats.metadata_fetches.push(from_uid);

        let Some(mailbox) = state.mailboxes.get(&selected) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(u32, StoredMessage)> = mailbox
            .messages
            .range(from_uid..)
            .map(|(uid, m)| (*uid, m.clone()))
            .collect();
        // `n:*` always includes the highest UID.
        if hits.is_empty() {
            if let Some((uid, m)) = mailbox.messages.iter().next_back() {
                hits.push((*uid, m.clone()));
            }
        }

        Ok(hits
            .into_iter()
            .map(|(uid, message)| FetchedMessage {
                uid,
                flags: message.flags,
                internal_date: Some(message.internal_date),
                size: Some(message.raw.len() as u32),
                header: Some(header_block(&message.raw)),
                structure: mime::parse_structure(&message.raw).ok(),
                preview: Some(preview_block(&message.raw)),
                body: None,
            })
            .collect())
    }

    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        let selected = self.selected()?.to_string();
        let mut state = self.server.state();
        state.stats.body_fetches.push(uids.to_vec());

        let Some(mailbox) = state.mailboxes.get(&selected) else {
            return Ok(Vec::new());
        };
        Ok(uids
            .iter()
            .filter_map(|uid| mailbox.messages.get(uid).map(|m| (*uid, m)))
            .map(|(uid, message)| FetchedMessage {
                uid,
                flags: message.flags,
                internal_date: Some(message.internal_date),
                size: Some(message.raw.len() as u32),
                body: Some(message.raw.clone()),
                ..FetchedMessage::default()
            })
            .collect())
    }

    async fn logout(&mut self) -> Result<()> {
        self.selected = None;
        Ok(())
    }
}
