//! Sync orchestrator.
//!
//! The [`SyncService`] mirrors the inbox-equivalent mailbox and the sent
//! mailbox of every account into local storage. Each pass is incremental on
//! the folder's UID checkpoint and stores metadata plus a short text
//! preview; full bodies are fetched later by the body fetcher.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection_pool::{ConnectionPool, PoolError, PooledSession};
use super::rule_engine::RuleEngine;
use super::thread_resolver::ThreadResolver;
use super::vault::{CredentialVault, VaultError};
use crate::config::SyncSettings;
use crate::domain::{
    display_name, Account, AccountId, Address, Attachment, AttachmentId, Email, EmailId, Folder,
    FolderId, FolderType, MessageId,
};
use crate::mime;
use crate::providers::email::{
    Credentials, FetchedMessage, MailboxStatus, ProviderError, PREVIEW_BYTES,
};
use crate::storage::queries::{accounts, folders, messages};
use crate::storage::{Database, DatabaseError};

/// Mailbox names tried for the inbox-equivalent pass, after any mailbox
/// advertising `\All`.
pub const INBOX_CANDIDATES: &[&str] = &[
    "[Gmail]/All Mail",
    "[Google Mail]/All Mail",
    "All Mail",
    "INBOX",
];

/// Mailbox names tried for the sent pass, after any mailbox advertising
/// `\Sent`.
pub const SENT_CANDIDATES: &[&str] = &[
    "[Gmail]/Sent Mail",
    "[Google Mail]/Sent Mail",
    "Sent",
    "Sent Items",
    "Sent Messages",
    "INBOX.Sent",
];

/// Errors raised by a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    Connect(#[from] PoolError),

    #[error("credential error: {0}")]
    Decryption(#[from] VaultError),

    #[error("server error: {0}")]
    Protocol(#[from] ProviderError),

    #[error("none of the {target} mailboxes exist: {tried:?}")]
    ProtocolSelect { target: SyncTarget, tried: Vec<String> },

    #[error("could not parse message {uid}: {reason}")]
    Parse { uid: u32, reason: String },

    #[error("storage error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Which mailbox a pass mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    /// The aggregate "all mail" view, or the inbox.
    Inbox,
    /// Sent mail.
    Sent,
}

impl SyncTarget {
    fn special_use(self) -> FolderType {
        match self {
            SyncTarget::Inbox => FolderType::All,
            SyncTarget::Sent => FolderType::Sent,
        }
    }

    fn fallbacks(self) -> &'static [&'static str] {
        match self {
            SyncTarget::Inbox => INBOX_CANDIDATES,
            SyncTarget::Sent => SENT_CANDIDATES,
        }
    }
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTarget::Inbox => write!(f, "inbox"),
            SyncTarget::Sent => write!(f, "sent"),
        }
    }
}

/// Status of an account's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Sync has never run.
    Never,
    /// Sync is currently in progress.
    InProgress,
    /// Last sync completed successfully.
    Success,
    /// Last sync failed.
    Failed,
    /// Last sync was cancelled.
    Cancelled,
}

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Progress,
    Error,
    Complete,
}

/// Running totals of a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Folders synced.
    pub folders: usize,
    /// Messages returned by the server.
    pub fetched: usize,
    /// New rows stored.
    pub stored: usize,
    /// Messages skipped after a parse or storage failure.
    pub skipped: usize,
    /// Cached messages removed after a UIDVALIDITY change.
    pub purged: usize,
}

impl SyncCounters {
    fn add(&mut self, other: &SyncCounters) {
        self.folders += other.folders;
        self.fetched += other.fetched;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.purged += other.purged;
    }
}

/// A progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub kind: ProgressKind,
    pub account_id: AccountId,
    pub message: String,
    pub counters: SyncCounters,
}

/// Receives progress events.
pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// Outcome of one folder pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSyncResult {
    pub target: SyncTarget,
    pub folder: String,
    pub counters: SyncCounters,
}

/// Result of syncing one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Passes that completed.
    pub folders: Vec<FolderSyncResult>,
    /// Totals over all passes.
    pub counters: SyncCounters,
    /// Errors of failed passes.
    pub errors: Vec<String>,
    /// Duration of the sync operation.
    pub duration_ms: u64,
}

impl SyncResult {
    /// Returns true if every pass completed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What [`SyncService::sync_account`] did.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The sync ran.
    Completed(SyncResult),
    /// Another sync of the account was in flight; nothing ran.
    AlreadyRunning,
}

/// Removes the account from the in-flight set when dropped.
struct InFlight<'a> {
    active: &'a StdMutex<HashSet<AccountId>>,
    account_id: AccountId,
}

impl<'a> InFlight<'a> {
    fn claim(active: &'a StdMutex<HashSet<AccountId>>, account_id: &AccountId) -> Option<Self> {
        let mut set = active.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(account_id.clone()) {
            return None;
        }
        Some(Self {
            active,
            account_id: account_id.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account_id);
    }
}

struct Reporter<'a> {
    account_id: &'a AccountId,
    callback: Option<&'a ProgressCallback>,
}

impl Reporter<'_> {
    fn emit(&self, kind: ProgressKind, message: impl Into<String>, counters: SyncCounters) {
        if let Some(callback) = self.callback {
            callback(&SyncProgress {
                kind,
                account_id: self.account_id.clone(),
                message: message.into(),
                counters,
            });
        }
    }
}

/// Sync service for mirroring mail accounts.
///
/// # Thread Safety
///
/// At most one sync per account runs at a time; a trigger for a busy
/// account returns [`SyncOutcome::AlreadyRunning`]. Background sync runs in
/// a separate task and can be stopped at any time.
pub struct SyncService {
    db: Arc<Database>,
    pool: Arc<ConnectionPool>,
    vault: Arc<CredentialVault>,
    resolver: ThreadResolver,
    rules: RuleEngine,
    settings: SyncSettings,
    status: RwLock<HashMap<AccountId, SyncStatus>>,
    active: StdMutex<HashSet<AccountId>>,
    background: Mutex<Option<CancellationToken>>,
}

impl SyncService {
    pub fn new(
        db: Arc<Database>,
        pool: Arc<ConnectionPool>,
        vault: Arc<CredentialVault>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            resolver: ThreadResolver::new(db.clone()),
            rules: RuleEngine::new(db.clone()),
            db,
            pool,
            vault,
            settings,
            status: RwLock::new(HashMap::new()),
            active: StdMutex::new(HashSet::new()),
            background: Mutex::new(None),
        }
    }

    /// Synchronizes a single account.
    pub async fn sync_account(
        &self,
        account_id: &AccountId,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncOutcome> {
        self.sync_account_with_cancel(account_id, progress, CancellationToken::new())
            .await
    }

    /// Synchronizes a single account, stopping between batches once
    /// `cancel` fires.
    pub async fn sync_account_with_cancel(
        &self,
        account_id: &AccountId,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome> {
        let Some(_guard) = InFlight::claim(&self.active, account_id) else {
            debug!(%account_id, "sync already running, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let reporter = Reporter {
            account_id,
            callback: progress.as_ref(),
        };
        self.set_status(account_id, SyncStatus::InProgress).await;
        reporter.emit(ProgressKind::Progress, "sync started", SyncCounters::default());

        let start = Instant::now();
        let result = self.run_sync(account_id, &reporter, &cancel).await;

        match result {
            Ok(mut sync_result) => {
                sync_result.duration_ms = start.elapsed().as_millis() as u64;
                let error = (!sync_result.errors.is_empty()).then(|| sync_result.errors.join("; "));
                self.record(account_id, error.as_deref()).await;

                if let Some(error) = error {
                    self.set_status(account_id, SyncStatus::Failed).await;
                    reporter.emit(ProgressKind::Error, error, sync_result.counters);
                } else {
                    self.set_status(account_id, SyncStatus::Success).await;
                    reporter.emit(ProgressKind::Complete, "sync complete", sync_result.counters);
                }
                info!(
                    %account_id,
                    stored = sync_result.counters.stored,
                    skipped = sync_result.counters.skipped,
                    duration_ms = sync_result.duration_ms,
                    "sync finished"
                );
                Ok(SyncOutcome::Completed(sync_result))
            }
            Err(SyncError::Cancelled) => {
                self.set_status(account_id, SyncStatus::Cancelled).await;
                reporter.emit(ProgressKind::Error, "sync cancelled", SyncCounters::default());
                info!(%account_id, "sync cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                error!(%account_id, error = %e, "sync failed");
                if !matches!(e, SyncError::AccountNotFound(_)) {
                    self.record(account_id, Some(&e.to_string())).await;
                }
                self.set_status(account_id, SyncStatus::Failed).await;
                reporter.emit(ProgressKind::Error, e.to_string(), SyncCounters::default());
                Err(e)
            }
        }
    }

    async fn run_sync(
        &self,
        account_id: &AccountId,
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let account = accounts::get_by_id(&self.db, account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;
        let credentials = self.credentials(&account).await?;

        let mut result = SyncResult {
            folders: Vec::new(),
            counters: SyncCounters::default(),
            errors: Vec::new(),
            duration_ms: 0,
        };

        let discovered = match self.discover_folders(&account, &credentials).await {
            Ok(found) => found,
            Err(e) => {
                warn!(%account_id, error = %e, "folder discovery failed");
                Vec::new()
            }
        };

        let mut targets = vec![SyncTarget::Inbox];
        if self.settings.sync_sent {
            targets.push(SyncTarget::Sent);
        }

        for target in targets {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self
                .sync_target(&account, &credentials, target, &discovered, reporter, cancel)
                .await
            {
                Ok(folder_result) => {
                    result.counters.add(&folder_result.counters);
                    result.folders.push(folder_result);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(%account_id, %target, error = %e, "folder pass failed");
                    reporter.emit(
                        ProgressKind::Error,
                        format!("{} sync failed: {}", target, e),
                        result.counters,
                    );
                    result.errors.push(format!("{}: {}", target, e));
                }
            }
        }

        Ok(result)
    }

    /// Decrypts the account password, re-encrypting legacy plaintext.
    async fn credentials(&self, account: &Account) -> Result<Credentials> {
        let credentials = self.vault.credentials(account)?;

        if self.vault.is_enabled() && !CredentialVault::is_encrypted(&account.password) {
            let sealed = self.vault.encrypt(&credentials.password)?;
            match accounts::update_password(&self.db, &account.id, &sealed).await {
                Ok(()) => info!(account_id = %account.id, "re-encrypted legacy password"),
                Err(e) => warn!(account_id = %account.id, error = %e, "could not re-encrypt password"),
            }
        }
        Ok(credentials)
    }

    /// Lists the account's mailboxes and records them as folders.
    pub async fn sync_folders(&self, account_id: &AccountId) -> Result<Vec<Folder>> {
        let account = accounts::get_by_id(&self.db, account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;
        let credentials = self.credentials(&account).await?;
        self.discover_folders(&account, &credentials).await
    }

    async fn discover_folders(&self, account: &Account, credentials: &Credentials) -> Result<Vec<Folder>> {
        let mut session = self.acquire(account, credentials).await?;
        let mut remote = session.list_folders().await?;
        self.pool.release(session).await;

        // Parents before children.
        remote.sort_by_key(|f| {
            f.delimiter
                .as_deref()
                .map(|d| f.name.matches(d).count())
                .unwrap_or(0)
        });

        let mut ids: HashMap<String, FolderId> = HashMap::new();
        let mut stored = Vec::with_capacity(remote.len());
        for entry in remote {
            let folder_type = entry
                .special_use
                .unwrap_or_else(|| FolderType::from_remote_name(&entry.name));
            let mut folder = Folder::new(account.id.clone(), entry.name.clone(), folder_type);
            folder.name = display_name(&entry.name, entry.delimiter.as_deref());
            folder.parent_id = entry
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| entry.name.rsplit_once(d))
                .and_then(|(parent, _)| ids.get(parent).cloned());

            let folder = folders::upsert(&self.db, &folder).await?;
            ids.insert(folder.remote_name.clone(), folder.id.clone());
            stored.push(folder);
        }

        debug!(account_id = %account.id, folders = stored.len(), "folders discovered");
        Ok(stored)
    }

    async fn acquire(&self, account: &Account, credentials: &Credentials) -> Result<PooledSession> {
        Ok(self
            .pool
            .acquire(&account.id, &account.imap, credentials)
            .await?)
    }

    /// Selects the first existing mailbox for `target`.
    async fn select_target(
        session: &mut PooledSession,
        target: SyncTarget,
        discovered: &[Folder],
    ) -> Result<(String, MailboxStatus)> {
        let mut candidates: Vec<String> = discovered
            .iter()
            .filter(|f| f.folder_type == target.special_use())
            .map(|f| f.remote_name.clone())
            .collect();
        for name in target.fallbacks() {
            if !candidates.iter().any(|c| c == name) {
                candidates.push(name.to_string());
            }
        }

        for name in &candidates {
            match session.select(name).await {
                Ok(status) => return Ok((name.clone(), status)),
                Err(ProviderError::NotFound(_)) => {
                    debug!(mailbox = %name, "mailbox not on server, trying next");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SyncError::ProtocolSelect {
            target,
            tried: candidates,
        })
    }

    /// One incremental pass over the mailbox for `target`.
    async fn sync_target(
        &self,
        account: &Account,
        credentials: &Credentials,
        target: SyncTarget,
        discovered: &[Folder],
        reporter: &Reporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<FolderSyncResult> {
        let mut session = self.acquire(account, credentials).await?;
        let (remote_name, status) = Self::select_target(&mut session, target, discovered).await?;

        let mut folder = match folders::get_by_remote_name(&self.db, &account.id, &remote_name).await? {
            Some(folder) => folder,
            None => {
                let folder_type = match target {
                    SyncTarget::Sent => FolderType::Sent,
                    SyncTarget::Inbox => FolderType::from_remote_name(&remote_name),
                };
                folders::upsert(&self.db, &Folder::new(account.id.clone(), remote_name.clone(), folder_type))
                    .await?
            }
        };

        let mut counters = SyncCounters {
            folders: 1,
            ..SyncCounters::default()
        };

        if folder.uid_validity != 0 && folder.uid_validity != status.uid_validity {
            counters.purged = messages::delete_by_remote_folder(&self.db, &folder.id).await?;
            warn!(
                account_id = %account.id,
                folder = %remote_name,
                old = folder.uid_validity,
                new = status.uid_validity,
                purged = counters.purged,
                "UIDVALIDITY changed, cached messages purged"
            );
            folder.uid_next = 0;
        }

        // The checkpoint alone decides: rows removed by rules must not
        // trigger a refetch.
        let floor = if folder.uid_next == 0 {
            1
        } else if folder.uid_next >= status.uid_next {
            self.pool.release(session).await;
            folders::refresh_counts(&self.db, &folder.id).await?;
            debug!(account_id = %account.id, folder = %remote_name, "no new mail");
            return Ok(FolderSyncResult {
                target,
                folder: remote_name,
                counters,
            });
        } else {
            folder.uid_next
        };

        if cancel.is_cancelled() {
            self.pool.release(session).await;
            return Err(SyncError::Cancelled);
        }

        let fetched = if status.exists == 0 {
            Vec::new()
        } else {
            session.fetch_metadata(floor).await?
        };
        self.pool.release(session).await;

        let batch: Vec<FetchedMessage> = fetched.into_iter().filter(|m| m.uid >= floor).collect();
        counters.fetched = batch.len();
        reporter.emit(
            ProgressKind::Progress,
            format!("fetched {} messages from {}", batch.len(), remote_name),
            counters,
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        for message in &batch {
            let uid = message.uid;
            match self.ingest(account, &folder, status.uid_validity, message).await {
                Ok(true) => counters.stored += 1,
                Ok(false) => {}
                Err(e) => {
                    counters.skipped += 1;
                    warn!(
                        account_id = %account.id,
                        folder = %remote_name,
                        uid,
                        error = %e,
                        "skipping message"
                    );
                }
            }
        }

        folders::set_checkpoint(&self.db, &folder.id, status.uid_validity, status.uid_next).await?;
        let (unread, total) = folders::refresh_counts(&self.db, &folder.id).await?;

        info!(
            account_id = %account.id,
            folder = %remote_name,
            fetched = counters.fetched,
            stored = counters.stored,
            unread,
            total,
            "folder synced"
        );
        reporter.emit(
            ProgressKind::Progress,
            format!("{} synced", remote_name),
            counters,
        );

        Ok(FolderSyncResult {
            target,
            folder: remote_name,
            counters,
        })
    }

    /// Decodes and stores one fetched message. Returns true when the row is
    /// new.
    async fn ingest(
        &self,
        account: &Account,
        folder: &Folder,
        uid_validity: u32,
        fetched: &FetchedMessage,
    ) -> Result<bool> {
        let uid = fetched.uid;
        let header = fetched.header.as_deref().ok_or_else(|| SyncError::Parse {
            uid,
            reason: "server returned no header".to_string(),
        })?;
        let headers = mime::parse_headers(header).map_err(|e| SyncError::Parse {
            uid,
            reason: e.to_string(),
        })?;

        let message_id = headers
            .message_id
            .map(|id| MessageId::from(id.normalized()))
            .filter(|id| !id.0.is_empty())
            .unwrap_or_else(|| synthetic_message_id(folder, uid_validity, uid));

        let email_id = EmailId::generate();
        let attachments: Vec<Attachment> = fetched
            .structure
            .as_ref()
            .map(mime::attachments_from_structure)
            .unwrap_or_default()
            .into_iter()
            .map(|a| Attachment {
                id: AttachmentId::generate(),
                email_id: email_id.clone(),
                filename: a.filename,
                content_type: a.content_type,
                size_bytes: a.size,
                content_id: a.content_id,
                is_inline: a.is_inline,
                storage_key: None,
            })
            .collect();

        let preview = fetched
            .preview
            .as_deref()
            .and_then(|text| mime::preview_text(header, text, text.len() >= PREVIEW_BYTES));

        let thread_id = self
            .resolver
            .resolve(
                &account.id,
                &message_id,
                headers.in_reply_to.as_ref(),
                &headers.references,
            )
            .await?;

        let email = Email {
            id: email_id,
            account_id: account.id.clone(),
            folder_id: folder.id.clone(),
            remote_folder_id: folder.id.clone(),
            uid,
            thread_id,
            message_id,
            in_reply_to: headers.in_reply_to,
            references: headers.references,
            from: headers.from.unwrap_or_else(|| Address::new("")),
            to: headers.to,
            cc: headers.cc,
            reply_to: headers.reply_to,
            subject: headers.subject,
            body_text: None,
            body_html: None,
            snippet: preview.as_deref().map(mime::snippet).unwrap_or_default(),
            date: headers
                .date
                .or(fetched.internal_date)
                .unwrap_or_else(Utc::now),
            is_read: fetched.flags.seen,
            is_starred: fetched.flags.flagged,
            is_answered: fetched.flags.answered,
            is_draft: fetched.flags.draft,
            has_attachments: !attachments.is_empty(),
            body_fetched: false,
            attachments,
        };

        if !messages::insert_if_absent(&self.db, &email).await? {
            return Ok(false);
        }
        if let Err(e) = self.resolver.adopt_placeholders(&email).await {
            warn!(email_id = %email.id, error = %e, "could not merge placeholder threads");
        }

        if let Err(e) = self.rules.apply(&email, preview.as_deref()).await {
            warn!(email_id = %email.id, error = %e, "rule evaluation failed");
        }
        Ok(true)
    }

    /// Syncs every sync-enabled account concurrently.
    pub async fn sync_all_accounts(self: &Arc<Self>) -> Vec<(AccountId, Result<SyncOutcome>)> {
        self.sync_all_with_cancel(CancellationToken::new()).await
    }

    async fn sync_all_with_cancel(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Vec<(AccountId, Result<SyncOutcome>)> {
        let accounts = match accounts::get_sync_enabled(&self.db).await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "could not list accounts");
                return Vec::new();
            }
        };

        let handles: Vec<_> = accounts
            .into_iter()
            .map(|account| {
                let service = Arc::clone(self);
                let token = cancel.child_token();
                let id = account.id;
                tokio::spawn(async move {
                    let result = service.sync_account_with_cancel(&id, None, token).await;
                    (id, result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => error!(error = %e, "sync task panicked"),
            }
        }
        results
    }

    /// Starts background synchronization.
    ///
    /// Spawns a task that syncs all accounts every configured interval.
    /// Call [`stop_background_sync`](Self::stop_background_sync) to stop.
    pub async fn start_background_sync(self: Arc<Self>) {
        if !self.settings.enabled {
            info!("background sync disabled");
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.background.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let interval = self.settings.interval();
        let service = Arc::clone(&self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "background sync started");
            loop {
                service.sync_all_with_cancel(token.clone()).await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("background sync stopped");
        });
    }

    /// Stops background synchronization. In-flight passes stop at their
    /// next batch boundary.
    pub async fn stop_background_sync(&self) {
        if let Some(token) = self.background.lock().await.take() {
            token.cancel();
        }
    }

    /// Returns whether background sync is running.
    pub async fn is_background_sync_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Returns true while a sync of `account_id` is in flight.
    pub fn is_syncing(&self, account_id: &AccountId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(account_id)
    }

    /// Gets the sync status for an account.
    pub async fn get_sync_status(&self, account_id: &AccountId) -> SyncStatus {
        let status = self.status.read().await;
        status.get(account_id).copied().unwrap_or(SyncStatus::Never)
    }

    /// Rebuilds every thread id of an account.
    pub async fn reindex_threads(&self, account_id: &AccountId) -> Result<usize> {
        Ok(self.resolver.reindex(account_id).await?.updated)
    }

    async fn set_status(&self, account_id: &AccountId, status: SyncStatus) {
        self.status.write().await.insert(account_id.clone(), status);
    }

    async fn record(&self, account_id: &AccountId, error: Option<&str>) {
        if let Err(e) = accounts::set_sync_status(&self.db, account_id, Utc::now(), error).await {
            warn!(%account_id, error = %e, "could not record sync status");
        }
    }
}

/// Stable stand-in for a missing Message-ID.
fn synthetic_message_id(folder: &Folder, uid_validity: u32, uid: u32) -> MessageId {
    MessageId::from(format!("{}.{}.{}@mailsync.invalid", uid, uid_validity, folder.id))
}
