//! Message CRUD operations.
//!
//! Inserts are idempotent on `(remote_folder_id, uid)`. Attachments are
//! written in the same transaction as their message.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{
    AccountId, Address, Attachment, Email, EmailId, FolderId, MessageId, ThreadId,
};
use crate::storage::database::{Database, Result};

use super::attachments;

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, account_id, folder_id, uid, thread_id, message_id, in_reply_to,
        references_json, from_address, from_name, to_json, cc_json, reply_to_json,
        subject, body_text, body_html, snippet, date,
        is_read, is_starred, is_answered, is_draft, has_attachments, body_fetched,
        remote_folder_id
    FROM messages
"#;

/// Inserts a message unless one with the same `(remote_folder_id, uid)`
/// exists.
///
/// Returns `true` when a row was created.
pub async fn insert_if_absent(db: &Database, email: &Email) -> Result<bool> {
    let email = email.clone();

    db.transaction(move |tx| {
        let references_json = serde_json::to_string(&email.references)?;
        let to_json = serde_json::to_string(&email.to)?;
        let cc_json = serde_json::to_string(&email.cc)?;
        let reply_to_json = email
            .reply_to
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = tx.execute(
            r#"
            INSERT INTO messages (
                id, account_id, folder_id, uid, thread_id, message_id, in_reply_to,
                references_json, from_address, from_name, to_json, cc_json, reply_to_json,
                subject, body_text, body_html, snippet, date,
                is_read, is_starred, is_answered, is_draft, has_attachments, body_fetched,
                created_at, remote_folder_id
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23, ?24,
                ?25, ?26
            )
            ON CONFLICT(remote_folder_id, uid) DO NOTHING
            "#,
            params![
                email.id.0,
                email.account_id.0,
                email.folder_id.0,
                email.uid,
                email.thread_id.0,
                email.message_id.0,
                email.in_reply_to.as_ref().map(|m| &m.0),
                references_json,
                email.from.email,
                email.from.name,
                to_json,
                cc_json,
                reply_to_json,
                email.subject,
                email.body_text,
                email.body_html,
                email.snippet,
                email.date.to_rfc3339(),
                email.is_read as i32,
                email.is_starred as i32,
                email.is_answered as i32,
                email.is_draft as i32,
                email.has_attachments as i32,
                email.body_fetched as i32,
                Utc::now().to_rfc3339(),
                email.remote_folder_id.0,
            ],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        for attachment in &email.attachments {
            attachments::insert_with(tx, attachment)?;
        }

        Ok(true)
    })
    .await
}

/// Retrieves a message by its ID, with attachments.
pub async fn get_by_id(db: &Database, email_id: &EmailId) -> Result<Option<Email>> {
    let email_id = email_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let email = conn.query_row(&sql, [&email_id.0], row_to_email).optional()?;
        match email {
            Some(mut email) => {
                email.attachments = attachments::load_for(conn, &email.id)?;
                Ok(Some(email))
            }
            None => Ok(None),
        }
    })
    .await
}

/// Retrieves several messages by ID, with attachments. Missing IDs are skipped.
pub async fn get_many(db: &Database, ids: &[EmailId]) -> Result<Vec<Email>> {
    let ids = ids.to_vec();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(mut email) = stmt.query_row([&id.0], row_to_email).optional()? {
                email.attachments = attachments::load_for(conn, &email.id)?;
                out.push(email);
            }
        }
        Ok(out)
    })
    .await
}

/// Returns the thread id of a message with the given Message-ID, if one is
/// stored for the account.
pub async fn find_thread_id(
    db: &Database,
    account_id: &AccountId,
    message_id: &MessageId,
) -> Result<Option<ThreadId>> {
    let account_id = account_id.clone();
    let message_id = message_id.clone();

    db.with_conn(move |conn| {
        let thread: Option<String> = conn
            .query_row(
                "SELECT thread_id FROM messages WHERE account_id = ?1 AND message_id = ?2 LIMIT 1",
                params![account_id.0, message_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(thread.map(ThreadId))
    })
    .await
}

/// Retrieves all messages in a thread, oldest first, with attachments.
pub async fn get_by_thread(
    db: &Database,
    account_id: &AccountId,
    thread_id: &ThreadId,
) -> Result<Vec<Email>> {
    let account_id = account_id.clone();
    let thread_id = thread_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE account_id = ?1 AND thread_id = ?2 ORDER BY date ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id.0, thread_id.0], row_to_email)?;
        let mut emails = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for email in &mut emails {
            email.attachments = attachments::load_for(conn, &email.id)?;
        }
        Ok(emails)
    })
    .await
}

/// Retrieves every message of an account, oldest first, without attachments.
pub async fn get_by_account(db: &Database, account_id: &AccountId) -> Result<Vec<Email>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE account_id = ?1 ORDER BY date ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([&account_id.0], row_to_email)?;
        let emails: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(emails?)
    })
    .await
}

/// Counts the messages stored for a folder.
pub async fn count_in_folder(db: &Database, folder_id: &FolderId) -> Result<u32> {
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE folder_id = ?1",
            [&folder_id.0],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

/// Deletes every message whose UID belongs to `folder_id` on the server,
/// wherever it is filed locally. Returns the number removed.
pub async fn delete_by_remote_folder(db: &Database, folder_id: &FolderId) -> Result<usize> {
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        let removed = conn.execute(
            "DELETE FROM messages WHERE remote_folder_id = ?1",
            [&folder_id.0],
        )?;
        Ok(removed)
    })
    .await
}

/// Sets the thread id of one message.
pub async fn set_thread_id(db: &Database, email_id: &EmailId, thread_id: &ThreadId) -> Result<()> {
    let email_id = email_id.clone();
    let thread_id = thread_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE messages SET thread_id = ?1 WHERE id = ?2",
            params![thread_id.0, email_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Moves every message of `from` onto `to` within an account.
/// Returns the number of rows changed.
pub async fn reassign_thread(
    db: &Database,
    account_id: &AccountId,
    from: &ThreadId,
    to: &ThreadId,
) -> Result<usize> {
    if from == to {
        return Ok(0);
    }
    let account_id = account_id.clone();
    let from = from.clone();
    let to = to.clone();

    db.with_conn(move |conn| {
        let changed = conn.execute(
            "UPDATE messages SET thread_id = ?1 WHERE account_id = ?2 AND thread_id = ?3",
            params![to.0, account_id.0, from.0],
        )?;
        Ok(changed)
    })
    .await
}

/// Writes several thread assignments in one transaction.
pub async fn set_thread_ids(db: &Database, updates: Vec<(EmailId, ThreadId)>) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }

    db.transaction(move |tx| {
        let mut stmt = tx.prepare("UPDATE messages SET thread_id = ?1 WHERE id = ?2")?;
        for (email_id, thread_id) in &updates {
            stmt.execute(params![thread_id.0, email_id.0])?;
        }
        Ok(())
    })
    .await
}

/// Stores a downloaded body and its attachment records.
///
/// Attachment rows that already exist with the same filename and content-id
/// keep their id so references handed out earlier stay valid; rows with no
/// counterpart in `attachments` are removed.
pub async fn store_body(
    db: &Database,
    email_id: &EmailId,
    body_text: Option<String>,
    body_html: Option<String>,
    snippet: String,
    attachments: Vec<Attachment>,
) -> Result<Vec<Attachment>> {
    let email_id = email_id.clone();

    db.transaction(move |tx| {
        tx.execute(
            r#"
            UPDATE messages
            SET body_text = ?1, body_html = ?2, snippet = ?3,
                has_attachments = ?4, body_fetched = 1
            WHERE id = ?5
            "#,
            params![
                body_text,
                body_html,
                snippet,
                (!attachments.is_empty()) as i32,
                email_id.0
            ],
        )?;

        let mut existing = attachments::load_for(tx, &email_id)?;
        let mut stored = Vec::with_capacity(attachments.len());
        for mut attachment in attachments {
            attachment.email_id = email_id.clone();
            let found = existing.iter().position(|a| {
                a.filename == attachment.filename && a.content_id == attachment.content_id
            });
            match found {
                Some(idx) => {
                    let old = existing.swap_remove(idx);
                    attachment.id = old.id;
                    if attachment.storage_key.is_none() {
                        attachment.storage_key = old.storage_key;
                    }
                    attachments::update_with(tx, &attachment)?;
                }
                None => attachments::insert_with(tx, &attachment)?,
            }
            stored.push(attachment);
        }
        for stale in existing {
            tx.execute("DELETE FROM attachments WHERE id = ?1", [&stale.id.0])?;
        }

        Ok(stored)
    })
    .await
}

/// Updates the read flag.
pub async fn set_read(db: &Database, email_id: &EmailId, is_read: bool) -> Result<()> {
    let email_id = email_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE messages SET is_read = ?1 WHERE id = ?2",
            params![is_read as i32, email_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Updates the starred flag.
pub async fn set_starred(db: &Database, email_id: &EmailId, is_starred: bool) -> Result<()> {
    let email_id = email_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE messages SET is_starred = ?1 WHERE id = ?2",
            params![is_starred as i32, email_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Files a message under another local folder. The remote folder and UID
/// are kept, so the body can still be fetched from where it lives.
pub async fn set_folder(db: &Database, email_id: &EmailId, folder_id: &FolderId) -> Result<()> {
    let email_id = email_id.clone();
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE messages SET folder_id = ?1 WHERE id = ?2",
            params![folder_id.0, email_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Deletes a message; attachments and label links cascade.
pub async fn delete(db: &Database, email_id: &EmailId) -> Result<()> {
    let email_id = email_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM messages WHERE id = ?1", [&email_id.0])?;
        Ok(())
    })
    .await
}

pub(super) fn row_to_email(row: &Row<'_>) -> std::result::Result<Email, rusqlite::Error> {
    let in_reply_to: Option<String> = row.get(6)?;
    let references_json: String = row.get(7)?;
    let from_name: Option<String> = row.get(9)?;
    let to_json: String = row.get(10)?;
    let cc_json: String = row.get(11)?;
    let reply_to_json: Option<String> = row.get(12)?;
    let date_str: String = row.get(17)?;

    let references: Vec<MessageId> = serde_json::from_str(&references_json).unwrap_or_default();
    let to: Vec<Address> = serde_json::from_str(&to_json).unwrap_or_default();
    let cc: Vec<Address> = serde_json::from_str(&cc_json).unwrap_or_default();
    let reply_to: Option<Address> = reply_to_json.and_then(|s| serde_json::from_str(&s).ok());

    let date = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Email {
        id: EmailId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        folder_id: FolderId(row.get(2)?),
        uid: row.get(3)?,
        thread_id: ThreadId(row.get(4)?),
        message_id: MessageId(row.get(5)?),
        in_reply_to: in_reply_to.map(MessageId),
        references,
        from: Address {
            email: row.get(8)?,
            name: from_name,
        },
        to,
        cc,
        reply_to,
        subject: row.get(13)?,
        body_text: row.get(14)?,
        body_html: row.get(15)?,
        snippet: row.get(16)?,
        date,
        is_read: row.get::<_, i32>(18)? != 0,
        is_starred: row.get::<_, i32>(19)? != 0,
        is_answered: row.get::<_, i32>(20)? != 0,
        is_draft: row.get::<_, i32>(21)? != 0,
        has_attachments: row.get::<_, i32>(22)? != 0,
        body_fetched: row.get::<_, i32>(23)? != 0,
        remote_folder_id: FolderId(row.get(24)?),
        attachments: vec![],
    })
}
