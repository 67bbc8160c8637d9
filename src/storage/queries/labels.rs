//! Label database queries.
//!
//! Labels are created on demand by name and linked to messages through
//! `message_labels`.

use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, EmailId, Label, LabelId};
use crate::storage::database::{Database, Result};

/// Returns the label with this name, creating it when missing.
pub async fn get_or_create(db: &Database, account_id: &AccountId, name: &str) -> Result<Label> {
    let candidate = Label::new(account_id.clone(), name);

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO labels (id, account_id, name, color)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(account_id, name) DO NOTHING
            "#,
            params![
                candidate.id.0,
                candidate.account_id.0,
                candidate.name,
                candidate.color
            ],
        )?;
        let label = conn.query_row(
            "SELECT id, account_id, name, color FROM labels WHERE account_id = ?1 AND name = ?2",
            params![candidate.account_id.0, candidate.name],
            row_to_label,
        )?;
        Ok(label)
    })
    .await
}

/// Gets all labels for an account.
pub async fn get_by_account(db: &Database, account_id: &AccountId) -> Result<Vec<Label>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, account_id, name, color FROM labels WHERE account_id = ?1 ORDER BY name",
        )?;
        let labels = stmt.query_map([&account_id.0], row_to_label)?;
        Ok(labels.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Gets a label by ID.
pub async fn get_by_id(db: &Database, label_id: &LabelId) -> Result<Option<Label>> {
    let label_id = label_id.clone();

    db.with_conn(move |conn| {
        let label = conn
            .query_row(
                "SELECT id, account_id, name, color FROM labels WHERE id = ?1",
                [&label_id.0],
                row_to_label,
            )
            .optional()?;
        Ok(label)
    })
    .await
}

/// Links a label to a message. Linking twice is a no-op.
pub async fn attach(db: &Database, email_id: &EmailId, label_id: &LabelId) -> Result<()> {
    let email_id = email_id.clone();
    let label_id = label_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?1, ?2)",
            params![email_id.0, label_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Gets the labels linked to a message.
pub async fn get_for_message(db: &Database, email_id: &EmailId) -> Result<Vec<Label>> {
    let email_id = email_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT l.id, l.account_id, l.name, l.color
            FROM labels l
            JOIN message_labels ml ON ml.label_id = l.id
            WHERE ml.message_id = ?1
            ORDER BY l.name
            "#,
        )?;
        let labels = stmt.query_map([&email_id.0], row_to_label)?;
        Ok(labels.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

fn row_to_label(row: &Row<'_>) -> std::result::Result<Label, rusqlite::Error> {
    Ok(Label {
        id: LabelId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        name: row.get(2)?,
        color: row.get(3)?,
    })
}
