//! End-to-end tests of the sync engine against the in-process mail server.
//!
//! Each service module carries its own unit tests; these exercise the
//! services together through the public API.

use std::sync::Arc;
use std::time::Duration;

use mailsync::config::{PoolSettings, SyncSettings};
use mailsync::domain::{
    Account, AccountId, Address, FolderId, MatchMode, MessageId, Rule, RuleAction, RuleField,
    RuleOperator, ServerEndpoint,
};
use mailsync::providers::email::{MemoryMailServer, OutgoingEmail};
use mailsync::services::{
    BodyFetcher, ConnectionPool, CredentialVault, SendService, SyncOutcome, SyncResult,
    SyncService, ThreadService,
};
use mailsync::storage::queries::{accounts, attachments, folders, labels, messages, rules, threads};
use mailsync::storage::{Database, MemoryBlobStore};
use pretty_assertions::assert_eq;

struct Engine {
    db: Arc<Database>,
    server: MemoryMailServer,
    blobs: Arc<MemoryBlobStore>,
    sync: Arc<SyncService>,
    bodies: Arc<BodyFetcher>,
    account: AccountId,
}

async fn engine() -> Engine {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let account = Account::new(
        "owner@example.com",
        "secret",
        ServerEndpoint::imap_tls("imap.example.com"),
        ServerEndpoint::smtp_submission("smtp.example.com"),
    );
    accounts::insert(&db, &account).await.unwrap();

    let server = MemoryMailServer::new();
    server.add_mailbox("INBOX", 1, None);
    server.add_mailbox("Sent", 1, None);

    let vault = Arc::new(CredentialVault::disabled());
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(server.clone()),
        PoolSettings::default(),
    ));
    let blobs = Arc::new(MemoryBlobStore::new());
    let sync = Arc::new(SyncService::new(
        db.clone(),
        pool.clone(),
        vault.clone(),
        SyncSettings::default(),
    ));
    let bodies = Arc::new(BodyFetcher::new(db.clone(), pool, vault, blobs.clone()));

    Engine {
        db,
        server,
        blobs,
        sync,
        bodies,
        account: account.id,
    }
}

impl Engine {
    async fn run(&self) -> SyncResult {
        match self.sync.sync_account(&self.account, None).await.unwrap() {
            SyncOutcome::Completed(result) => result,
            SyncOutcome::AlreadyRunning => panic!("sync skipped"),
        }
    }

    async fn inbox(&self) -> FolderId {
        folders::get_by_remote_name(&self.db, &self.account, "INBOX")
            .await
            .unwrap()
            .unwrap()
            .id
    }
}

fn message(id: &str, headers: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{id}>\r\nFrom: Alice <alice@example.com>\r\nTo: owner@example.com\r\nSubject: Note {id}\r\n{headers}\r\nHello from {id}\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn full_then_incremental_sync() {
    let e = engine().await;
    for i in 1..=49 {
        e.server.append("INBOX", message(&format!("m{i}@x"), ""));
    }

    let result = e.run().await;
    assert!(result.is_success());
    assert_eq!(result.counters.stored, 49);

    let inbox = folders::get_by_remote_name(&e.db, &e.account, "INBOX")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbox.uid_next, 50);
    assert_eq!(inbox.total_count, 49);
    assert_eq!(inbox.unread_count, 49);

    // Nothing new: the inbox is not fetched again.
    let fetches = e.server.stats().metadata_fetches.len();
    let result = e.run().await;
    assert_eq!(result.counters.fetched, 0);
    assert_eq!(e.server.stats().metadata_fetches.len(), fetches);

    e.server.append("INBOX", message("m50@x", ""));
    e.server.append("INBOX", message("m51@x", ""));
    let result = e.run().await;
    assert_eq!(result.counters.stored, 2);
    assert!(e.server.stats().metadata_fetches.contains(&50));
    assert_eq!(messages::count_in_folder(&e.db, &inbox.id).await.unwrap(), 51);
}

#[tokio::test]
async fn refetching_known_uids_is_idempotent() {
    let e = engine().await;
    for i in 1..=3 {
        e.server.append("INBOX", message(&format!("m{i}@x"), ""));
    }
    e.run().await;

    // Lose the checkpoint; the next pass refetches everything.
    let inbox = e.inbox().await;
    folders::set_checkpoint(&e.db, &inbox, 1, 0).await.unwrap();

    let result = e.run().await;
    assert_eq!(result.counters.fetched, 3);
    assert_eq!(result.counters.stored, 0);
    assert_eq!(messages::count_in_folder(&e.db, &inbox).await.unwrap(), 3);
}

#[tokio::test]
async fn uid_validity_change_purges_and_refetches() {
    let e = engine().await;
    for i in 1..=4 {
        e.server.append("INBOX", message(&format!("m{i}@x"), ""));
    }
    e.run().await;

    e.server.reset_uid_validity("INBOX", 2);
    let result = e.run().await;
    assert_eq!(result.counters.purged, 4);
    assert_eq!(result.counters.stored, 4);

    let inbox = folders::get_by_remote_name(&e.db, &e.account, "INBOX")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbox.uid_validity, 2);
    assert_eq!(messages::count_in_folder(&e.db, &inbox.id).await.unwrap(), 4);
}

#[tokio::test]
async fn replies_arriving_first_join_one_thread() {
    let e = engine().await;
    // Newest first; the grandchild only names its parent.
    e.server
        .append("INBOX", message("c@x", "In-Reply-To: <b@x>\r\n"));
    e.server.append(
        "INBOX",
        message("b@x", "In-Reply-To: <a@x>\r\nReferences: <a@x>\r\n"),
    );
    e.server.append("Sent", message("a@x", ""));
    e.run().await;

    assert_eq!(
        threads::count_by_account(&e.db, &e.account).await.unwrap(),
        1
    );
    let all = messages::get_by_account(&e.db, &e.account).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|m| m.thread_id == all[0].thread_id));

    // A full rebuild agrees with the incremental result.
    assert_eq!(e.sync.reindex_threads(&e.account).await.unwrap(), 0);
}

#[tokio::test]
async fn every_arrival_order_converges_after_reindex() {
    let chain = [
        ("a@x", String::new()),
        ("b@x", "In-Reply-To: <a@x>\r\nReferences: <a@x>\r\n".to_string()),
        ("c@x", "In-Reply-To: <b@x>\r\nReferences: <a@x> <b@x>\r\n".to_string()),
        ("d@x", "In-Reply-To: <c@x>\r\n".to_string()),
    ];
    let orders: [[usize; 4]; 6] = [
        [0, 1, 2, 3],
        [3, 2, 1, 0],
        [1, 3, 0, 2],
        [2, 0, 3, 1],
        [3, 0, 2, 1],
        [1, 2, 3, 0],
    ];

    for order in orders {
        let e = engine().await;
        // One sync per message so each arrives in its own pass.
        for idx in order {
            let (id, headers) = &chain[idx];
            e.server.append("INBOX", message(id, headers));
            e.run().await;
        }
        e.sync.reindex_threads(&e.account).await.unwrap();

        let all = messages::get_by_account(&e.db, &e.account).await.unwrap();
        assert_eq!(all.len(), 4, "order {order:?}");
        assert!(
            all.iter().all(|m| m.thread_id == all[0].thread_id),
            "order {order:?} left {:?}",
            all.iter().map(|m| (&m.message_id.0, &m.thread_id.0)).collect::<Vec<_>>()
        );
    }
}

#[tokio::test]
async fn rules_run_on_new_mail() {
    let e = engine().await;
    let newsletters = Rule::new(e.account.clone(), "newsletters")
        .match_mode(MatchMode::Any)
        .when(RuleField::From, RuleOperator::EndsWith, "@news.example.com")
        .when(RuleField::Subject, RuleOperator::Contains, "digest")
        .then(RuleAction::AssignLabel {
            label: "News".to_string(),
        })
        .then(RuleAction::MarkRead);
    let urgent = Rule::new(e.account.clone(), "urgent")
        .priority(1)
        .when(RuleField::Subject, RuleOperator::StartsWith, "urgent")
        .when(RuleField::Body, RuleOperator::Regex, r"ticket #\d+")
        .then(RuleAction::Star);
    rules::save(&e.db, &newsletters).await.unwrap();
    rules::save(&e.db, &urgent).await.unwrap();

    e.server.append(
        "INBOX",
        b"Message-ID: <n@x>\r\nFrom: news@news.example.com\r\nSubject: Hello\r\n\r\nhi\r\n".to_vec(),
    );
    e.server.append(
        "INBOX",
        b"Message-ID: <u@x>\r\nFrom: ops@example.com\r\nSubject: URGENT outage\r\n\r\nsee ticket #4211\r\n".to_vec(),
    );
    e.run().await;

    let stored = messages::get_by_account(&e.db, &e.account).await.unwrap();
    let news = stored
        .iter()
        .find(|m| m.message_id == MessageId::from("n@x"))
        .unwrap();
    assert!(news.is_read);
    let attached = labels::get_for_message(&e.db, &news.id).await.unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].name, "News");

    // The body is not stored yet; the body condition reads the preview.
    let urgent = stored
        .iter()
        .find(|m| m.message_id == MessageId::from("u@x"))
        .unwrap();
    assert!(urgent.is_starred);
    assert!(!urgent.body_fetched);
    assert_eq!(urgent.snippet, "see ticket #4211");
}

fn invoice(id: &str) -> Vec<u8> {
    format!("Message-ID: <{id}>\r\nFrom: billing@example.com\r\nSubject: Invoice {id}\r\n\r\nTotal due\r\n")
        .into_bytes()
}

#[tokio::test]
async fn moved_messages_still_load_their_bodies() {
    let e = engine().await;
    let receipts = Rule::new(e.account.clone(), "receipts")
        .when(RuleField::Subject, RuleOperator::StartsWith, "invoice")
        .then(RuleAction::MoveToFolder {
            folder: "Receipts".to_string(),
        });
    rules::save(&e.db, &receipts).await.unwrap();

    // Both mailboxes hand out UID 1.
    e.server.append("INBOX", invoice("in@x"));
    e.server.append("Sent", invoice("out@x"));
    let result = e.run().await;
    assert_eq!(result.counters.stored, 2);

    let stored = messages::get_by_account(&e.db, &e.account).await.unwrap();
    assert_eq!(stored.len(), 2);
    let target = folders::get_by_name(&e.db, &e.account, "Receipts")
        .await
        .unwrap()
        .unwrap();
    assert!(stored.iter().all(|m| m.folder_id == target.id && m.uid == 1));

    let ids: Vec<_> = stored.iter().map(|m| m.id.clone()).collect();
    let fetched = e.bodies.fetch_bodies(&ids).await.unwrap();
    assert!(fetched.iter().all(|m| m.body_fetched));
    assert!(fetched
        .iter()
        .all(|m| m.body_text.as_deref().unwrap().contains("Total due")));
}

#[tokio::test]
async fn rule_deleted_mail_is_not_downloaded_again() {
    let e = engine().await;
    let purge = Rule::new(e.account.clone(), "drop everything")
        .when(RuleField::From, RuleOperator::Contains, "@")
        .then(RuleAction::Delete);
    rules::save(&e.db, &purge).await.unwrap();
    e.server.append("INBOX", message("spam@x", ""));

    let first = e.run().await;
    assert_eq!(first.counters.fetched, 1);
    for _ in 0..2 {
        let again = e.run().await;
        assert_eq!(again.counters.fetched, 0);
        assert_eq!(again.counters.stored, 0);
    }

    assert!(messages::get_by_account(&e.db, &e.account).await.unwrap().is_empty());
    assert_eq!(e.server.stats().metadata_fetches, vec![1]);
}

#[tokio::test]
async fn rules_still_run_when_thread_merge_fails() {
    let e = engine().await;
    let starred = Rule::new(e.account.clone(), "star the root")
        .when(RuleField::Subject, RuleOperator::Contains, "a@x")
        .then(RuleAction::Star);
    rules::save(&e.db, &starred).await.unwrap();

    // The reply arrives first and waits on a placeholder thread.
    e.server.append("INBOX", message("b@x", "In-Reply-To: <a@x>\r\n"));
    e.run().await;

    // Thread ids can no longer be rewritten.
    e.db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER thread_ids_locked BEFORE UPDATE OF thread_id ON messages
             BEGIN SELECT RAISE(ABORT, 'locked'); END;",
        )?;
        Ok(())
    })
    .await
    .unwrap();

    // The root belongs to an older conversation, so adopting the reply
    // would rewrite its thread id.
    e.server.append("INBOX", message("a@x", "References: <z@x>\r\n"));
    let result = e.run().await;
    assert_eq!(result.counters.stored, 1);
    assert_eq!(result.counters.skipped, 0);

    let stored = messages::get_by_account(&e.db, &e.account).await.unwrap();
    let root = stored
        .iter()
        .find(|m| m.message_id == MessageId::from("a@x"))
        .unwrap();
    let reply = stored
        .iter()
        .find(|m| m.message_id == MessageId::from("b@x"))
        .unwrap();
    assert!(root.is_starred);
    assert_ne!(reply.thread_id, root.thread_id);
}

const WITH_ATTACHMENT: &str = "Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached\r\n\
--b\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--b--\r\n";

#[tokio::test]
async fn identical_attachments_share_one_blob() {
    let e = engine().await;
    for id in ["p1@x", "p2@x"] {
        let raw = format!(
            "Message-ID: <{id}>\r\nFrom: a@example.com\r\nSubject: report\r\nMIME-Version: 1.0\r\n{WITH_ATTACHMENT}"
        );
        e.server.append("INBOX", raw.into_bytes());
    }
    e.run().await;

    let stored = messages::get_by_account(&e.db, &e.account).await.unwrap();
    let with_files: Vec<_> = stored.iter().filter(|m| m.has_attachments).collect();
    assert_eq!(with_files.len(), 2);

    let ids: Vec<_> = stored.iter().map(|m| m.id.clone()).collect();
    let fetched = e.bodies.fetch_bodies(&ids).await.unwrap();
    assert!(fetched.iter().all(|m| m.body_fetched));
    assert_eq!(e.server.stats().body_fetches.len(), 1);
    assert_eq!(e.blobs.len().await, 1);

    let files = attachments::get_by_message(&e.db, &with_files[0].id)
        .await
        .unwrap();
    assert_eq!(files[0].filename, "report.pdf");
    let bytes = e.bodies.download_attachment(&files[0].id).await.unwrap();
    assert_eq!(bytes, b"%PDF-1.4\n");
}

#[tokio::test]
async fn malformed_base64_does_not_abort_the_fetch() {
    let e = engine().await;
    let raw = "Message-ID: <bad@x>\r\nFrom: a@example.com\r\nSubject: broken\r\nMIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nreadable\r\n\
--b\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment; filename=\"x.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\r\n@@@ this is not base64 @@@\r\n--b--\r\n";
    e.server.append("INBOX", raw.as_bytes().to_vec());
    e.run().await;

    let stored = messages::get_by_account(&e.db, &e.account).await.unwrap();
    let fetched = e.bodies.fetch_bodies(&[stored[0].id.clone()]).await.unwrap();
    assert!(fetched[0].body_fetched);
    assert!(fetched[0].body_text.as_deref().unwrap().contains("readable"));
}

#[tokio::test]
async fn conversation_view_downloads_bodies() {
    let e = engine().await;
    e.server.append("INBOX", message("a@x", ""));
    e.server.append(
        "INBOX",
        message("b@x", "In-Reply-To: <a@x>\r\nReferences: <a@x>\r\n"),
    );
    e.run().await;

    let service = ThreadService::new(e.db.clone(), e.bodies.clone());
    let listed = service.get_threads(&e.account, None, 20, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].message_count, 2);

    let thread = service
        .get_thread_conversation(&e.account, &listed[0].id)
        .await
        .unwrap();
    assert_eq!(thread.messages.len(), 2);
    assert!(thread.messages.iter().all(|m| m.body_fetched));
}

#[tokio::test(start_paused = true)]
async fn queued_reply_can_be_withdrawn() {
    let e = engine().await;
    let sender = SendService::new(
        e.db.clone(),
        Arc::new(CredentialVault::disabled()),
        Arc::new(e.server.clone()),
        Duration::from_secs(10),
    );

    let mut reply = OutgoingEmail::new(vec![Address::new("alice@example.com")], "Re: Note", "Thanks");
    reply.in_reply_to = Some(MessageId::from("a@x"));

    let withdrawn = sender.queue_send(&e.account, reply.clone(), None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(sender.cancel_send(&withdrawn).await.is_some());

    sender.queue_send(&e.account, reply, None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    let sent = e.server.sent();
    assert_eq!(sent.len(), 1);
    assert!(String::from_utf8_lossy(&sent[0]).contains("In-Reply-To: <a@x>"));
}
