//! On-demand download of message bodies and attachment content.
//!
//! The sync pass only stores metadata. When a caller opens messages whose
//! bodies are missing, the fetcher selects each remote folder once, pulls
//! every pending UID of that folder in one `UID FETCH`, decodes the bodies
//! and caches attachment content in the blob store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection_pool::{ConnectionPool, PoolError};
use super::vault::{CredentialVault, VaultError};
use crate::domain::{Account, AccountId, Attachment, AttachmentId, Email, EmailId, FolderId};
use crate::mime::{self, ExtractedAttachment};
use crate::providers::email::ProviderError;
use crate::storage::queries::{accounts, attachments, folders, messages};
use crate::storage::{content_key, BlobError, BlobStore, Database, DatabaseError};

/// Errors raised while fetching bodies or attachments.
#[derive(Debug, Error)]
pub enum BodyFetchError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("folder not found: {0}")]
    FolderNotFound(FolderId),

    #[error("attachment not found: {0}")]
    AttachmentNotFound(AttachmentId),

    #[error("attachment {0} has no downloadable content")]
    AttachmentUnavailable(AttachmentId),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for body fetches.
pub type Result<T> = std::result::Result<T, BodyFetchError>;

/// Fetches full message content on demand.
pub struct BodyFetcher {
    db: Arc<Database>,
    pool: Arc<ConnectionPool>,
    vault: Arc<CredentialVault>,
    blobs: Arc<dyn BlobStore>,
}

impl BodyFetcher {
    pub fn new(
        db: Arc<Database>,
        pool: Arc<ConnectionPool>,
        vault: Arc<CredentialVault>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            db,
            pool,
            vault,
            blobs,
        }
    }

    /// Returns the requested messages with bodies, downloading any that
    /// were never fetched.
    ///
    /// Unknown ids are skipped. The result follows the order of `ids`.
    pub async fn fetch_bodies(&self, ids: &[EmailId]) -> Result<Vec<Email>> {
        let emails = messages::get_many(&self.db, ids).await?;
        let pending: Vec<&Email> = emails.iter().filter(|e| !e.body_fetched).collect();
        if pending.is_empty() {
            return Ok(emails);
        }

        self.download(&pending).await?;
        Ok(messages::get_many(&self.db, ids).await?)
    }

    /// Returns the content of an attachment, from the blob store when it
    /// was cached and from the server otherwise.
    pub async fn download_attachment(&self, attachment_id: &AttachmentId) -> Result<Vec<u8>> {
        let attachment = attachments::get_by_id(&self.db, attachment_id)
            .await?
            .ok_or_else(|| BodyFetchError::AttachmentNotFound(attachment_id.clone()))?;

        if let Some(key) = &attachment.storage_key {
            match self.blobs.download(key).await {
                Ok(bytes) => return Ok(bytes),
                Err(BlobError::NotFound(_)) => {
                    warn!(%attachment_id, "cached attachment missing from blob store");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let email = messages::get_by_id(&self.db, &attachment.email_id)
            .await?
            .ok_or_else(|| BodyFetchError::AttachmentNotFound(attachment_id.clone()))?;
        self.download(&[&email]).await?;

        let refreshed = attachments::get_by_id(&self.db, attachment_id).await?;
        let key = refreshed
            .and_then(|a| a.storage_key)
            .ok_or_else(|| BodyFetchError::AttachmentUnavailable(attachment_id.clone()))?;
        Ok(self.blobs.download(&key).await?)
    }

    /// Downloads and stores the bodies of `emails`, one select and one fetch
    /// per remote folder.
    ///
    /// A folder that cannot be read is logged and skipped so the other
    /// folders still load. Connection and credential failures end the
    /// whole download.
    async fn download(&self, emails: &[&Email]) -> Result<()> {
        let mut by_folder: BTreeMap<&FolderId, Vec<&Email>> = BTreeMap::new();
        for &email in emails {
            by_folder.entry(&email.remote_folder_id).or_default().push(email);
        }

        let mut accounts_seen: HashMap<AccountId, Account> = HashMap::new();
        for (folder_id, group) in by_folder {
            match self.download_folder(folder_id, &group, &mut accounts_seen).await {
                Ok(()) => {}
                Err(e @ (BodyFetchError::Pool(_) | BodyFetchError::Vault(_))) => return Err(e),
                Err(e) => {
                    warn!(%folder_id, pending = group.len(), error = %e, "skipping folder body fetch");
                }
            }
        }
        Ok(())
    }

    async fn download_folder(
        &self,
        folder_id: &FolderId,
        group: &[&Email],
        accounts_seen: &mut HashMap<AccountId, Account>,
    ) -> Result<()> {
        let folder = folders::get_by_id(&self.db, folder_id)
            .await?
            .ok_or_else(|| BodyFetchError::FolderNotFound(folder_id.clone()))?;

        let account = match accounts_seen.get(&folder.account_id) {
            Some(account) => account.clone(),
            None => {
                let account = accounts::get_by_id(&self.db, &folder.account_id)
                    .await?
                    .ok_or_else(|| BodyFetchError::AccountNotFound(folder.account_id.clone()))?;
                accounts_seen.insert(account.id.clone(), account.clone());
                account
            }
        };
        let credentials = self.vault.credentials(&account)?;

        let uids: Vec<u32> = group.iter().map(|e| e.uid).collect();
        let mut session = self
            .pool
            .acquire(&account.id, &account.imap, &credentials)
            .await?;
        session.select(&folder.remote_name).await?;
        let fetched = session.fetch_bodies(&uids).await?;
        self.pool.release(session).await;

        debug!(
            folder = %folder.remote_name,
            requested = uids.len(),
            received = fetched.len(),
            "fetched message bodies"
        );

        let by_uid: HashMap<u32, &Email> = group.iter().map(|e| (e.uid, *e)).collect();
        for message in fetched {
            let (Some(email), Some(raw)) = (by_uid.get(&message.uid), message.body) else {
                continue;
            };
            if let Err(e) = self.store(email, &raw).await {
                warn!(email_id = %email.id, uid = message.uid, error = %e, "failed to store body");
            }
        }
        Ok(())
    }

    async fn store(&self, email: &Email, raw: &[u8]) -> Result<()> {
        let parsed = match mime::parse_message(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(email_id = %email.id, error = %e, "could not parse message body");
                return Ok(());
            }
        };

        let mut records = Vec::with_capacity(parsed.attachments.len());
        for extracted in parsed.attachments {
            records.push(self.cache_attachment(&email.id, extracted).await?);
        }

        let stored = messages::store_body(
            &self.db,
            &email.id,
            parsed.text,
            parsed.html,
            parsed.snippet,
            records,
        )
        .await?;
        info!(email_id = %email.id, attachments = stored.len(), "message body stored");
        Ok(())
    }

    async fn cache_attachment(
        &self,
        email_id: &EmailId,
        extracted: ExtractedAttachment,
    ) -> Result<Attachment> {
        let storage_key = match &extracted.data {
            Some(bytes) => {
                let key = content_key(bytes);
                self.blobs.upload(&key, bytes).await?;
                Some(key)
            }
            None => None,
        };

        Ok(Attachment {
            id: AttachmentId::generate(),
            email_id: email_id.clone(),
            filename: extracted.filename,
            content_type: extracted.content_type,
            size_bytes: extracted.size,
            content_id: extracted.content_id,
            is_inline: extracted.is_inline,
            storage_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::domain::ThreadId;
    use crate::providers::email::MemoryMailServer;
    use crate::storage::queries::test_support::{make_email, seed_account, seed_folder};
    use crate::storage::MemoryBlobStore;

    const WITH_PDF: &[u8] = b"Message-ID: <p@x>\r\n\
Subject: report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--b\r\n\
Content-Type: application/pdf; name=\"r.pdf\"\r\n\
Content-Disposition: attachment; filename=\"r.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--b--\r\n";

    struct Fixture {
        db: Arc<Database>,
        server: MemoryMailServer,
        blobs: Arc<MemoryBlobStore>,
        fetcher: BodyFetcher,
        account: AccountId,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let account = seed_account(&db).await;
        let server = MemoryMailServer::new();
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(server.clone()),
            PoolSettings::default(),
        ));
        let blobs = Arc::new(MemoryBlobStore::new());
        let fetcher = BodyFetcher::new(
            db.clone(),
            pool,
            Arc::new(CredentialVault::disabled()),
            blobs.clone(),
        );
        Fixture {
            db,
            server,
            blobs,
            fetcher,
            account,
        }
    }

    async fn ingest(f: &Fixture, mailbox: &str, folder: &FolderId, raw: &[u8], n: usize) -> Vec<EmailId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let uid = f.server.append(mailbox, raw.to_vec()).unwrap();
            let mut email = make_email(&f.account, folder, uid, &format!("{}-{}@x", mailbox, i));
            email.thread_id = ThreadId::from("t");
            messages::insert_if_absent(&f.db, &email).await.unwrap();
            ids.push(email.id);
        }
        ids
    }

    #[tokio::test]
    async fn one_fetch_per_folder() {
        let f = fixture().await;
        f.server.add_mailbox("INBOX", 1, None);
        f.server.add_mailbox("Archive", 1, None);
        let inbox = seed_folder(&f.db, &f.account, "INBOX").await;
        let archive = seed_folder(&f.db, &f.account, "Archive").await;

        let mut ids = ingest(&f, "INBOX", &inbox, WITH_PDF, 3).await;
        ids.extend(ingest(&f, "Archive", &archive, WITH_PDF, 2).await);

        let emails = f.fetcher.fetch_bodies(&ids).await.unwrap();
        assert_eq!(emails.len(), 5);
        assert!(emails.iter().all(|e| e.body_fetched));
        assert_eq!(emails[0].body_text.as_deref().map(str::trim), Some("See attached."));
        assert_eq!(emails[0].attachments.len(), 1);

        let stats = f.server.stats();
        assert_eq!(stats.selects.len(), 2);
        assert_eq!(stats.body_fetches.len(), 2);
        assert_eq!(stats.logins, 1);

        // Already fetched: nothing goes over the wire.
        f.fetcher.fetch_bodies(&ids).await.unwrap();
        assert_eq!(f.server.stats().body_fetches.len(), 2);

        // Identical content is stored once.
        assert_eq!(f.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn moved_messages_load_from_their_source_mailbox() {
        let f = fixture().await;
        f.server.add_mailbox("INBOX", 1, None);
        f.server.add_mailbox("Sent", 1, None);
        let inbox = seed_folder(&f.db, &f.account, "INBOX").await;
        let sent = seed_folder(&f.db, &f.account, "Sent").await;
        let receipts = seed_folder(&f.db, &f.account, "Receipts").await;

        let mut ids = ingest(&f, "INBOX", &inbox, WITH_PDF, 1).await;
        ids.extend(ingest(&f, "Sent", &sent, WITH_PDF, 1).await);
        for id in &ids {
            messages::set_folder(&f.db, id, &receipts).await.unwrap();
        }

        let emails = f.fetcher.fetch_bodies(&ids).await.unwrap();
        assert!(emails.iter().all(|e| e.body_fetched && e.folder_id == receipts));
        let mut selects = f.server.stats().selects;
        selects.sort();
        assert_eq!(selects, vec!["INBOX".to_string(), "Sent".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_folder_does_not_block_the_others() {
        let f = fixture().await;
        f.server.add_mailbox("INBOX", 1, None);
        let inbox = seed_folder(&f.db, &f.account, "INBOX").await;
        // Known locally, gone on the server.
        let gone = seed_folder(&f.db, &f.account, "Old Project").await;

        let mut ids = ingest(&f, "INBOX", &inbox, WITH_PDF, 1).await;
        let mut orphan = make_email(&f.account, &gone, 7, "orphan@x");
        orphan.thread_id = ThreadId::from("t");
        messages::insert_if_absent(&f.db, &orphan).await.unwrap();
        ids.push(orphan.id.clone());

        let emails = f.fetcher.fetch_bodies(&ids).await.unwrap();
        let fetched: Vec<bool> = emails.iter().map(|e| e.body_fetched).collect();
        assert_eq!(fetched, vec![true, false]);
    }

    #[tokio::test]
    async fn attachment_download_uses_cache_then_server() {
        let f = fixture().await;
        f.server.add_mailbox("INBOX", 1, None);
        let inbox = seed_folder(&f.db, &f.account, "INBOX").await;
        let ids = ingest(&f, "INBOX", &inbox, WITH_PDF, 1).await;

        // Structural record created at sync time, no content yet.
        let record = Attachment {
            id: AttachmentId::generate(),
            email_id: ids[0].clone(),
            filename: "r.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 9,
            content_id: None,
            is_inline: false,
            storage_key: None,
        };
        messages::store_body(&f.db, &ids[0], None, None, String::new(), vec![record.clone()])
            .await
            .unwrap();

        let bytes = f.fetcher.download_attachment(&record.id).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4\n");
        assert_eq!(f.server.stats().body_fetches.len(), 1);

        let again = f.fetcher.download_attachment(&record.id).await.unwrap();
        assert_eq!(again, bytes);
        assert_eq!(f.server.stats().body_fetches.len(), 1);
    }

    #[tokio::test]
    async fn missing_attachment_is_reported() {
        let f = fixture().await;
        assert!(matches!(
            f.fetcher.download_attachment(&AttachmentId::from("nope")).await,
            Err(BodyFetchError::AttachmentNotFound(_))
        ));
    }
}
