//! Conversation threading from `References` and `In-Reply-To`.
//!
//! A message joins the thread of the first (root) entry of its References
//! chain, otherwise the thread of its parent, otherwise it starts a thread
//! keyed by its own Message-ID. When an ancestor has not been ingested yet
//! its Message-ID stands in as the thread id; ingesting the ancestor later
//! moves such placeholders onto the ancestor's thread, and
//! [`ThreadResolver::reindex`] repairs anything longer chains leave behind.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{normalize_message_id, AccountId, Email, MessageId, ThreadId};
use crate::storage::queries::messages;
use crate::storage::{Database, Result};

/// Upper bound on propagation passes during a reindex.
pub const MAX_REINDEX_PASSES: usize = 10;

/// The message that determines a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Anchor {
    /// First entry of References.
    Root(String),
    /// In-Reply-To target.
    Parent(String),
    /// No threading headers.
    Own(String),
}

impl Anchor {
    fn of(message_id: &MessageId, in_reply_to: Option<&MessageId>, references: &[MessageId]) -> Self {
        if let Some(root) = references
            .iter()
            .map(MessageId::normalized)
            .find(|id| !id.is_empty())
        {
            return Anchor::Root(root);
        }
        if let Some(parent) = in_reply_to
            .map(MessageId::normalized)
            .filter(|id| !id.is_empty())
        {
            return Anchor::Parent(parent);
        }
        Anchor::Own(normalize_message_id(&message_id.0))
    }

    fn for_email(email: &Email) -> Self {
        Self::of(&email.message_id, email.in_reply_to.as_ref(), &email.references)
    }
}

/// Outcome of a reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReindexReport {
    /// Messages whose thread id changed.
    pub updated: usize,
    /// Propagation passes run.
    pub passes: usize,
}

/// Assigns thread ids to messages.
#[derive(Clone)]
pub struct ThreadResolver {
    db: Arc<Database>,
}

impl ThreadResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Picks the thread id for a message about to be stored.
    pub async fn resolve(
        &self,
        account_id: &AccountId,
        message_id: &MessageId,
        in_reply_to: Option<&MessageId>,
        references: &[MessageId],
    ) -> Result<ThreadId> {
        match Anchor::of(message_id, in_reply_to, references) {
            Anchor::Root(id) | Anchor::Parent(id) => {
                let stored =
                    messages::find_thread_id(&self.db, account_id, &MessageId::from(id.as_str()))
                        .await?;
                Ok(stored.unwrap_or_else(|| ThreadId::from(id)))
            }
            Anchor::Own(id) => Ok(ThreadId::from(id)),
        }
    }

    /// Moves messages that used `email`'s Message-ID as a placeholder thread
    /// onto `email`'s thread. Call after `email` is stored.
    pub async fn adopt_placeholders(&self, email: &Email) -> Result<usize> {
        let placeholder = ThreadId::from(email.message_id.normalized());
        let moved =
            messages::reassign_thread(&self.db, &email.account_id, &placeholder, &email.thread_id)
                .await?;
        if moved > 0 {
            debug!(
                account_id = %email.account_id,
                message_id = %email.message_id,
                moved,
                "merged placeholder thread"
            );
        }
        Ok(moved)
    }

    /// Recomputes every thread id of an account.
    pub async fn reindex(&self, account_id: &AccountId) -> Result<ReindexReport> {
        let mut emails = messages::get_by_account(&self.db, account_id).await?;
        let (changed, passes) = propagate(&mut emails);

        let updates: Vec<_> = changed
            .into_iter()
            .map(|idx| (emails[idx].id.clone(), emails[idx].thread_id.clone()))
            .collect();
        let report = ReindexReport {
            updated: updates.len(),
            passes,
        };
        messages::set_thread_ids(&self.db, updates).await?;

        info!(%account_id, updated = report.updated, passes = report.passes, "threads reindexed");
        Ok(report)
    }
}

/// Runs propagation passes over `emails` in place until nothing changes or
/// [`MAX_REINDEX_PASSES`] is reached. Returns the indices of changed
/// messages and the number of passes run.
fn propagate(emails: &mut [Email]) -> (Vec<usize>, usize) {
    let mut by_message_id: HashMap<String, usize> = HashMap::new();
    for (idx, email) in emails.iter().enumerate() {
        by_message_id
            .entry(email.message_id.normalized())
            .or_insert(idx);
    }
    let anchors: Vec<Anchor> = emails.iter().map(Anchor::for_email).collect();
    let original: Vec<ThreadId> = emails.iter().map(|e| e.thread_id.clone()).collect();

    let mut passes = 0;
    while passes < MAX_REINDEX_PASSES {
        passes += 1;
        let mut changed_this_pass = false;

        for idx in 0..emails.len() {
            let target = match &anchors[idx] {
                Anchor::Root(id) | Anchor::Parent(id) => match by_message_id.get(id) {
                    Some(&anchor_idx) if anchor_idx != idx => emails[anchor_idx].thread_id.clone(),
                    _ => ThreadId::from(id.as_str()),
                },
                Anchor::Own(id) => ThreadId::from(id.as_str()),
            };
            if emails[idx].thread_id != target {
                emails[idx].thread_id = target;
                changed_this_pass = true;
            }
        }

        if !changed_this_pass {
            break;
        }
    }

    let changed = emails
        .iter()
        .zip(original.iter())
        .enumerate()
        .filter(|(_, (email, before))| &email.thread_id != *before)
        .map(|(idx, _)| idx)
        .collect();
    (changed, passes)
}
