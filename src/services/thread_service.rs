//! Conversation listing and reading.
//!
//! Threads are derived from stored messages. Listing only touches the
//! local database; reading a conversation pulls any bodies the sync pass
//! left behind through the [`BodyFetcher`].

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use super::body_fetcher::{BodyFetchError, BodyFetcher};
use crate::domain::{AccountId, EmailId, FolderId, Thread, ThreadId, ThreadSummary};
use crate::storage::queries::{messages, threads};
use crate::storage::{Database, DatabaseError};

/// Errors that can occur during thread operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// Thread not found.
    #[error("thread not found: {0}")]
    NotFound(ThreadId),

    #[error(transparent)]
    Bodies(#[from] BodyFetchError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for thread operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Service for reading email threads.
pub struct ThreadService {
    db: Arc<Database>,
    bodies: Arc<BodyFetcher>,
}

impl ThreadService {
    /// Creates a new thread service.
    pub fn new(db: Arc<Database>, bodies: Arc<BodyFetcher>) -> Self {
        Self { db, bodies }
    }

    /// Lists thread summaries, newest activity first.
    ///
    /// With `folder_id`, only threads that have a message in that folder
    /// are returned.
    pub async fn get_threads(
        &self,
        account_id: &AccountId,
        folder_id: Option<&FolderId>,
        limit: u32,
        offset: u32,
    ) -> ThreadResult<Vec<ThreadSummary>> {
        Ok(threads::get_summaries(&self.db, account_id, folder_id, limit, offset).await?)
    }

    /// Returns every message of a thread, oldest first.
    ///
    /// Missing bodies are downloaded first. If that fails the conversation
    /// is still returned with the metadata that is stored.
    pub async fn get_thread_conversation(
        &self,
        account_id: &AccountId,
        thread_id: &ThreadId,
    ) -> ThreadResult<Thread> {
        let mut emails = messages::get_by_thread(&self.db, account_id, thread_id).await?;
        if emails.is_empty() {
            return Err(ThreadError::NotFound(thread_id.clone()));
        }

        let pending: Vec<EmailId> = emails
            .iter()
            .filter(|e| !e.body_fetched)
            .map(|e| e.id.clone())
            .collect();
        if !pending.is_empty() {
            match self.bodies.fetch_bodies(&pending).await {
                Ok(_) => emails = messages::get_by_thread(&self.db, account_id, thread_id).await?,
                Err(e) => warn!(%thread_id, error = %e, "could not fetch bodies, showing headers only"),
            }
        }

        Ok(Thread::from_messages(thread_id.clone(), account_id.clone(), emails))
    }

    /// Counts the threads of an account.
    pub async fn count(&self, account_id: &AccountId) -> ThreadResult<u32> {
        Ok(threads::count_by_account(&self.db, account_id).await?)
    }
}
