//! Per-account pool of authenticated IMAP sessions.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::PoolSettings;
use crate::domain::{AccountId, ServerEndpoint};
use crate::providers::email::{Credentials, MailConnector, MailSession, ProviderError};

/// Errors raised by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("could not connect account {account_id} after {attempts} attempts: {source}")]
    Connect {
        account_id: AccountId,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("connection pool closed")]
    Closed,
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// A session checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`] once the work succeeded.
/// Dropping it instead closes the connection, which is the right thing to
/// do after a protocol error.
pub struct PooledSession {
    account_id: AccountId,
    session: Box<dyn MailSession>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }
}

impl Deref for PooledSession {
    type Target = dyn MailSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

/// Bounded, per-account pool of IMAP sessions.
pub struct ConnectionPool {
    connector: Arc<dyn MailConnector>,
    settings: PoolSettings,
    idle: Mutex<HashMap<AccountId, Vec<Box<dyn MailSession>>>>,
    limits: Mutex<HashMap<AccountId, Arc<Semaphore>>>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new(connector: Arc<dyn MailConnector>, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            idle: Mutex::new(HashMap::new()),
            limits: Mutex::new(HashMap::new()),
        }
    }

    async fn limit_for(&self, account_id: &AccountId) -> Arc<Semaphore> {
        let mut limits = self.limits.lock().await;
        limits
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.max_per_account.max(1))))
            .clone()
    }

    /// Checks out a session for `account_id`, reusing an idle one when
    /// possible.
    ///
    /// Waits while the account is at its connection limit. New connections
    /// are attempted up to the configured number of times with no delay in
    /// between.
    pub async fn acquire(
        &self,
        account_id: &AccountId,
        endpoint: &ServerEndpoint,
        credentials: &Credentials,
    ) -> Result<PooledSession> {
        let permit = self
            .limit_for(account_id)
            .await
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let reused = {
            let mut idle = self.idle.lock().await;
            idle.get_mut(account_id).and_then(Vec::pop)
        };
        if let Some(session) = reused {
            debug!(%account_id, "reusing pooled IMAP session");
            return Ok(PooledSession {
                account_id: account_id.clone(),
                session,
                _permit: permit,
            });
        }

        let attempts = self.settings.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.connect(endpoint, credentials).await {
                Ok(session) => {
                    debug!(%account_id, attempt, "opened IMAP session");
                    return Ok(PooledSession {
                        account_id: account_id.clone(),
                        session,
                        _permit: permit,
                    });
                }
                Err(e) if attempt < attempts => {
                    warn!(%account_id, attempt, error = %e, "IMAP connect failed, retrying");
                }
                Err(e) => {
                    return Err(PoolError::Connect {
                        account_id: account_id.clone(),
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }

    /// Returns a healthy session to the idle list.
    pub async fn release(&self, pooled: PooledSession) {
        let PooledSession {
            account_id,
            session,
            _permit,
        } = pooled;
        let mut idle = self.idle.lock().await;
        idle.entry(account_id).or_default().push(session);
    }

    /// Number of idle sessions held for `account_id`.
    pub async fn idle_count(&self, account_id: &AccountId) -> usize {
        self.idle
            .lock()
            .await
            .get(account_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Logs out and drops every idle session of `account_id`.
    pub async fn close_account(&self, account_id: &AccountId) {
        let sessions = self.idle.lock().await.remove(account_id).unwrap_or_default();
        for mut session in sessions {
            if let Err(e) = session.logout().await {
                debug!(%account_id, error = %e, "logout failed while closing pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::providers::email::{FetchedMessage, MailboxStatus, RemoteFolder};

    struct NullSession;

    #[async_trait]
    impl MailSession for NullSession {
        async fn list_folders(&mut self) -> crate::providers::email::Result<Vec<RemoteFolder>> {
            Ok(vec![])
        }
        async fn select(&mut self, _mailbox: &str) -> crate::providers::email::Result<MailboxStatus> {
            Ok(MailboxStatus::default())
        }
        async fn fetch_metadata(&mut self, _from_uid: u32) -> crate::providers::email::Result<Vec<FetchedMessage>> {
            Ok(vec![])
        }
        async fn fetch_bodies(&mut self, _uids: &[u32]) -> crate::providers::email::Result<Vec<FetchedMessage>> {
            Ok(vec![])
        }
        async fn logout(&mut self) -> crate::providers::email::Result<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` connection attempts.
    struct FlakyConnector {
        failures: usize,
        attempts: AtomicUsize,
    }

    impl FlakyConnector {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MailConnector for FlakyConnector {
        async fn connect(
            &self,
            _endpoint: &ServerEndpoint,
            _credentials: &Credentials,
        ) -> crate::providers::email::Result<Box<dyn MailSession>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ProviderError::Tls("handshake reset".to_string()))
            } else {
                Ok(Box::new(NullSession))
            }
        }
    }

    fn settings(max: usize) -> PoolSettings {
        PoolSettings {
            max_per_account: max,
            connect_attempts: 3,
        }
    }

    fn endpoint() -> ServerEndpoint {
        ServerEndpoint::imap_tls("imap.example.com")
    }

    fn creds() -> Credentials {
        Credentials::new("me", "pw")
    }

    #[tokio::test]
    async fn retries_until_connected() {
        let connector = FlakyConnector::new(2);
        let pool = ConnectionPool::new(connector.clone(), settings(2));
        let account = AccountId::from("a");

        let session = pool.acquire(&account, &endpoint(), &creds()).await;
        assert!(session.is_ok());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let connector = FlakyConnector::new(10);
        let pool = ConnectionPool::new(connector.clone(), settings(2));
        let account = AccountId::from("a");

        let result = pool.acquire(&account, &endpoint(), &creds()).await;
        assert!(matches!(result, Err(PoolError::Connect { attempts: 3, .. })));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let connector = FlakyConnector::new(0);
        let pool = ConnectionPool::new(connector.clone(), settings(2));
        let account = AccountId::from("a");

        let session = pool.acquire(&account, &endpoint(), &creds()).await.unwrap();
        pool.release(session).await;
        assert_eq!(pool.idle_count(&account).await, 1);

        let _again = pool.acquire(&account, &endpoint(), &creds()).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(&account).await, 0);
    }

    #[tokio::test]
    async fn dropped_sessions_are_discarded() {
        let connector = FlakyConnector::new(0);
        let pool = ConnectionPool::new(connector.clone(), settings(1));
        let account = AccountId::from("a");

        let session = pool.acquire(&account, &endpoint(), &creds()).await.unwrap();
        drop(session);

        let _fresh = pool.acquire(&account, &endpoint(), &creds()).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn limit_is_per_account() {
        let connector = FlakyConnector::new(0);
        let pool = Arc::new(ConnectionPool::new(connector, settings(1)));
        let a = AccountId::from("a");
        let b = AccountId::from("b");

        let held = pool.acquire(&a, &endpoint(), &creds()).await.unwrap();

        // Another account is not blocked.
        let other = pool.acquire(&b, &endpoint(), &creds()).await;
        assert!(other.is_ok());

        // The same account waits until the first session comes back.
        let waiting = {
            let pool = Arc::clone(&pool);
            let a = a.clone();
            tokio::spawn(async move { pool.acquire(&a, &endpoint(), &creds()).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        pool.release(held).await;
        assert!(waiting.await.unwrap());
    }
}
