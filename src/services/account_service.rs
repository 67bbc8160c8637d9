//! Account service for managing mail accounts.
//!
//! Every password that reaches the `accounts` table goes through the
//! [`CredentialVault`] first, so nothing is persisted in plaintext once a
//! vault key is configured.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::connection_pool::ConnectionPool;
use super::vault::{CredentialVault, VaultError};
use crate::domain::{Account, AccountId};
use crate::storage::queries::accounts;
use crate::storage::{Database, DatabaseError};

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Account not found.
    #[error("account not found: {0}")]
    NotFound(AccountId),

    /// Credential sealing failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for account operations.
pub type AccountResult<T> = Result<T, AccountError>;

/// Creates, edits and removes accounts.
pub struct AccountService {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    pool: Arc<ConnectionPool>,
}

impl AccountService {
    /// Creates a new account service.
    pub fn new(db: Arc<Database>, vault: Arc<CredentialVault>, pool: Arc<ConnectionPool>) -> Self {
        Self { db, vault, pool }
    }

    /// Stores a new account. `account.password` is taken as plaintext and
    /// sealed before the insert.
    pub async fn create_account(&self, mut account: Account) -> AccountResult<Account> {
        account.password = self.seal(&account.password)?;
        accounts::insert(&self.db, &account).await?;
        info!(account_id = %account.id, email = %account.email, "account created");
        Ok(account)
    }

    /// Replaces the password of an existing account.
    ///
    /// Idle sessions opened with the old password are closed.
    pub async fn set_password(&self, account_id: &AccountId, password: &str) -> AccountResult<()> {
        if accounts::get_by_id(&self.db, account_id).await?.is_none() {
            return Err(AccountError::NotFound(account_id.clone()));
        }
        let sealed = self.seal(password)?;
        accounts::update_password(&self.db, account_id, &sealed).await?;
        self.pool.close_account(account_id).await;
        Ok(())
    }

    pub async fn get_account(&self, account_id: &AccountId) -> AccountResult<Account> {
        accounts::get_by_id(&self.db, account_id)
            .await?
            .ok_or_else(|| AccountError::NotFound(account_id.clone()))
    }

    pub async fn list_accounts(&self) -> AccountResult<Vec<Account>> {
        Ok(accounts::get_all(&self.db).await?)
    }

    /// Removes an account with everything mirrored for it and drops its
    /// pooled sessions.
    pub async fn delete_account(&self, account_id: &AccountId) -> AccountResult<()> {
        accounts::delete(&self.db, account_id).await?;
        self.pool.close_account(account_id).await;
        info!(%account_id, "account deleted");
        Ok(())
    }

    fn seal(&self, password: &str) -> AccountResult<String> {
        if CredentialVault::is_encrypted(password) {
            return Ok(password.to_string());
        }
        Ok(self.vault.encrypt(password)?)
    }
}
