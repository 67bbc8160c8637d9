//! Business services layer.
//!
//! Services sit between callers and the infrastructure layer:
//!
//! ```text
//!        Daemon / embedding application
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (Providers, Storage)
//! ```
//!
//! # Services Overview
//!
//! - [`AccountService`]: Creates and edits accounts, sealing passwords
//! - [`SyncService`]: Mirrors remote mailboxes into local storage
//! - [`ConnectionPool`]: Bounded per-account IMAP sessions
//! - [`CredentialVault`]: Encrypts stored passwords
//! - [`ThreadResolver`]: Assigns conversation ids
//! - [`BodyFetcher`]: Downloads bodies and attachments on demand
//! - [`RuleEngine`]: Runs user filter rules over new mail
//! - [`SendService`]: Outbound mail with an undo window
//! - [`ThreadService`]: Lists and reads conversations

mod account_service;
mod body_fetcher;
mod connection_pool;
mod rule_engine;
mod send_service;
mod sync_service;
mod thread_resolver;
mod thread_service;
mod vault;

pub use account_service::{AccountError, AccountResult, AccountService};
pub use body_fetcher::{BodyFetchError, BodyFetcher};
pub use connection_pool::{ConnectionPool, PoolError, PooledSession};
pub use rule_engine::{RuleEngine, RuleError, RuleOutcome};
pub use send_service::{PendingSend, SendError, SendService};
pub use sync_service::{
    FolderSyncResult, ProgressCallback, ProgressKind, SyncCounters, SyncError, SyncOutcome,
    SyncProgress, SyncResult, SyncService, SyncStatus, SyncTarget, INBOX_CANDIDATES,
    SENT_CANDIDATES,
};
pub use thread_resolver::{ReindexReport, ThreadResolver, MAX_REINDEX_PASSES};
pub use thread_service::{ThreadError, ThreadResult, ThreadService};
pub use vault::{CredentialVault, VaultError};
