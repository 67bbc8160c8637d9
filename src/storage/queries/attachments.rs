//! Attachment record operations.
//!
//! The synchronous helpers take a borrowed connection so they can run inside
//! a message transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{Attachment, AttachmentId, EmailId};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT id, message_id, filename, content_type, size_bytes, content_id, is_inline, storage_key
    FROM attachments
"#;

pub(crate) fn insert_with(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO attachments (
            id, message_id, filename, content_type, size_bytes, content_id, is_inline, storage_key
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            attachment.id.0,
            attachment.email_id.0,
            attachment.filename,
            attachment.content_type,
            attachment.size_bytes as i64,
            attachment.content_id,
            attachment.is_inline as i32,
            attachment.storage_key,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_with(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        r#"
        UPDATE attachments
        SET content_type = ?1, size_bytes = ?2, is_inline = ?3, storage_key = ?4
        WHERE id = ?5
        "#,
        params![
            attachment.content_type,
            attachment.size_bytes as i64,
            attachment.is_inline as i32,
            attachment.storage_key,
            attachment.id.0,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_for(conn: &Connection, email_id: &EmailId) -> Result<Vec<Attachment>> {
    let sql = format!("{SELECT_COLUMNS} WHERE message_id = ?1 ORDER BY rowid");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([&email_id.0], row_to_attachment)?;
    let attachments: std::result::Result<Vec<_>, _> = rows.collect();
    Ok(attachments?)
}

/// Retrieves an attachment by its ID.
pub async fn get_by_id(db: &Database, attachment_id: &AttachmentId) -> Result<Option<Attachment>> {
    let attachment_id = attachment_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let result = conn
            .query_row(&sql, [&attachment_id.0], row_to_attachment)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves the attachments of a message in part order.
pub async fn get_by_message(db: &Database, email_id: &EmailId) -> Result<Vec<Attachment>> {
    let email_id = email_id.clone();
    db.with_conn(move |conn| load_for(conn, &email_id)).await
}

/// Records the blob store key of a cached attachment.
pub async fn set_storage_key(
    db: &Database,
    attachment_id: &AttachmentId,
    storage_key: &str,
) -> Result<()> {
    let attachment_id = attachment_id.clone();
    let storage_key = storage_key.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE attachments SET storage_key = ?1 WHERE id = ?2",
            params![storage_key, attachment_id.0],
        )?;
        Ok(())
    })
    .await
}

fn row_to_attachment(row: &Row<'_>) -> std::result::Result<Attachment, rusqlite::Error> {
    Ok(Attachment {
        id: AttachmentId(row.get(0)?),
        email_id: EmailId(row.get(1)?),
        filename: row.get(2)?,
        content_type: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)?.max(0) as u64,
        content_id: row.get(5)?,
        is_inline: row.get::<_, i32>(6)? != 0,
        storage_key: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::messages;
    use crate::storage::queries::test_support::{make_email, seed_account, seed_folder};

    #[tokio::test]
    async fn storage_key_roundtrip() {
        let db = Database::open_in_memory().await.unwrap();
        let account_id = seed_account(&db).await;
        let folder_id = seed_folder(&db, &account_id, "INBOX").await;

        let mut email = make_email(&account_id, &folder_id, 1, "att@example.com");
        let attachment = Attachment {
            id: AttachmentId::from("att-1"),
            email_id: email.id.clone(),
            filename: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 12,
            content_id: None,
            is_inline: false,
            storage_key: None,
        };
        email.attachments.push(attachment.clone());
        messages::insert_if_absent(&db, &email).await.unwrap();

        set_storage_key(&db, &attachment.id, "deadbeef").await.unwrap();

        let loaded = get_by_id(&db, &attachment.id).await.unwrap().unwrap();
        assert_eq!(loaded.storage_key.as_deref(), Some("deadbeef"));
        assert_eq!(get_by_message(&db, &email.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attachments_cascade_with_message() {
        let db = Database::open_in_memory().await.unwrap();
        let account_id = seed_account(&db).await;
        let folder_id = seed_folder(&db, &account_id, "INBOX").await;

        let mut email = make_email(&account_id, &folder_id, 1, "c@example.com");
        email.attachments.push(Attachment {
            id: AttachmentId::from("att-2"),
            email_id: email.id.clone(),
            filename: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            size_bytes: 1,
            content_id: None,
            is_inline: false,
            storage_key: None,
        });
        messages::insert_if_absent(&db, &email).await.unwrap();
        messages::delete(&db, &email.id).await.unwrap();

        assert!(get_by_id(&db, &AttachmentId::from("att-2"))
            .await
            .unwrap()
            .is_none());
    }
}
