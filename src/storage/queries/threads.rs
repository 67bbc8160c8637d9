//! Thread query operations.
//!
//! Threads are derived by grouping `messages` on `thread_id`; there is no
//! thread table to keep in step.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::domain::{AccountId, Address, FolderId, ThreadId, ThreadSummary};
use crate::storage::database::{Database, Result};

/// Retrieves thread summaries for an account, newest activity first.
///
/// With `folder_id`, only threads having at least one message in that
/// folder are listed; counters still cover the whole thread.
pub async fn get_summaries(
    db: &Database,
    account_id: &AccountId,
    folder_id: Option<&FolderId>,
    limit: u32,
    offset: u32,
) -> Result<Vec<ThreadSummary>> {
    let account_id = account_id.clone();
    let folder_id = folder_id.map(|f| f.0.clone());

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            WITH ranked AS (
                SELECT
                    thread_id, account_id, subject, snippet, from_address, from_name, date,
                    ROW_NUMBER() OVER (PARTITION BY thread_id ORDER BY date DESC, uid DESC) AS rn,
                    COUNT(*) OVER (PARTITION BY thread_id) AS message_count,
                    SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END)
                        OVER (PARTITION BY thread_id) AS unread_count,
                    MAX(is_starred) OVER (PARTITION BY thread_id) AS is_starred
                FROM messages
                WHERE account_id = ?1
                  AND (?2 IS NULL OR thread_id IN (
                        SELECT thread_id FROM messages WHERE folder_id = ?2))
            )
            SELECT
                thread_id, account_id, subject, snippet, from_address, from_name, date,
                message_count, unread_count, is_starred
            FROM ranked
            WHERE rn = 1
            ORDER BY date DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )?;

        let rows = stmt.query_map(
            params![account_id.0, folder_id, limit, offset],
            row_to_summary,
        )?;
        let threads: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(threads?)
    })
    .await
}

/// Counts the distinct threads of an account.
pub async fn count_by_account(db: &Database, account_id: &AccountId) -> Result<u32> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let count = conn.query_row(
            "SELECT COUNT(DISTINCT thread_id) FROM messages WHERE account_id = ?1",
            [&account_id.0],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

fn row_to_summary(row: &Row<'_>) -> std::result::Result<ThreadSummary, rusqlite::Error> {
    let date_str: String = row.get(6)?;
    let date = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(ThreadSummary {
        id: ThreadId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        subject: row.get(2)?,
        snippet: row.get(3)?,
        from: Address {
            email: row.get(4)?,
            name: row.get(5)?,
        },
        last_message_date: date,
        message_count: row.get(7)?,
        unread_count: row.get(8)?,
        is_starred: row.get::<_, i32>(9)? != 0,
    })
}
