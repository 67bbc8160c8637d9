//! Outbound mail with an undo window.
//!
//! [`SendService::send_email`] submits right away. [`SendService::queue_send`]
//! holds the message for a delay during which [`SendService::cancel_send`]
//! can still withdraw it. Firing and cancelling both remove the pending
//! record under one lock, so exactly one of them wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::vault::{CredentialVault, VaultError};
use crate::domain::{Account, AccountId, MessageId, PendingSendId};
use crate::providers::email::{
    build_message, generate_message_id, MailTransport, OutgoingEmail, ProviderError,
};
use crate::storage::queries::accounts;
use crate::storage::{Database, DatabaseError};

/// Errors raised while sending.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for send operations.
pub type Result<T> = std::result::Result<T, SendError>;

/// A message waiting for its undo window to close.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub id: PendingSendId,
    pub account_id: AccountId,
    pub message_id: MessageId,
    pub email: OutgoingEmail,
    pub send_at: DateTime<Utc>,
    pub cancelled: bool,
}

struct Queued {
    record: PendingSend,
    account: Account,
}

type PendingMap = Arc<Mutex<HashMap<PendingSendId, Queued>>>;

/// Sends mail immediately or after an undo delay.
pub struct SendService {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    transport: Arc<dyn MailTransport>,
    undo_delay: Duration,
    pending: PendingMap,
}

impl SendService {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        transport: Arc<dyn MailTransport>,
        undo_delay: Duration,
    ) -> Self {
        Self {
            db,
            vault,
            transport,
            undo_delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn account(&self, account_id: &AccountId) -> Result<Account> {
        accounts::get_by_id(&self.db, account_id)
            .await?
            .ok_or_else(|| SendError::AccountNotFound(account_id.clone()))
    }

    /// Sends `email` now and returns its Message-ID.
    pub async fn send_email(&self, account_id: &AccountId, email: &OutgoingEmail) -> Result<MessageId> {
        let account = self.account(account_id).await?;
        let message_id = generate_message_id(&account.email);
        deliver(
            &self.vault,
            self.transport.as_ref(),
            &account,
            email,
            &message_id,
        )
        .await?;
        Ok(message_id)
    }

    /// Schedules `email` to be sent once `delay` (or the configured undo
    /// delay) has passed.
    ///
    /// The message is validated up front so malformed input fails here
    /// rather than after the delay.
    pub async fn queue_send(
        &self,
        account_id: &AccountId,
        email: OutgoingEmail,
        delay: Option<Duration>,
    ) -> Result<PendingSendId> {
        let account = self.account(account_id).await?;
        let message_id = generate_message_id(&account.email);
        build_message(&account, &email, &message_id)?;

        let delay = delay.unwrap_or(self.undo_delay);
        let id = PendingSendId::generate();
        let record = PendingSend {
            id: id.clone(),
            account_id: account_id.clone(),
            message_id,
            email,
            send_at: Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            cancelled: false,
        };
        self.pending
            .lock()
            .await
            .insert(id.clone(), Queued { record, account });

        let pending = Arc::clone(&self.pending);
        let vault = Arc::clone(&self.vault);
        let transport = Arc::clone(&self.transport);
        let task_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(queued) = pending.lock().await.remove(&task_id) else {
                return;
            };
            let Queued { record, account } = queued;
            match deliver(&vault, transport.as_ref(), &account, &record.email, &record.message_id).await {
                Ok(()) => info!(pending_id = %task_id, message_id = %record.message_id, "queued message sent"),
                Err(e) => error!(pending_id = %task_id, error = %e, "queued message failed to send"),
            }
        });

        info!(pending_id = %id, delay_secs = delay.as_secs(), "message queued");
        Ok(id)
    }

    /// Withdraws a queued message. Returns the withdrawn record, or `None`
    /// when it already fired or never existed.
    pub async fn cancel_send(&self, id: &PendingSendId) -> Option<PendingSend> {
        let removed = self.pending.lock().await.remove(id);
        match removed {
            Some(Queued { mut record, .. }) => {
                record.cancelled = true;
                info!(pending_id = %id, "queued message cancelled");
                Some(record)
            }
            None => {
                warn!(pending_id = %id, "nothing to cancel");
                None
            }
        }
    }

    /// Messages still inside their undo window.
    pub async fn pending_sends(&self) -> Vec<PendingSend> {
        let pending = self.pending.lock().await;
        let mut records: Vec<PendingSend> = pending.values().map(|q| q.record.clone()).collect();
        records.sort_by_key(|r| r.send_at);
        records
    }
}

async fn deliver(
    vault: &CredentialVault,
    transport: &dyn MailTransport,
    account: &Account,
    email: &OutgoingEmail,
    message_id: &MessageId,
) -> Result<()> {
    let credentials = vault.credentials(account)?;
    let message = build_message(account, email, message_id)?;
    transport.send(&account.smtp, &credentials, message).await?;
    Ok(())
}
