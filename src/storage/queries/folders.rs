//! Folder CRUD and sync checkpoint operations.

use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, Folder, FolderId, FolderType};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, account_id, name, remote_name, folder_type, parent_id,
        uid_validity, uid_next, unread_count, total_count
    FROM folders
"#;

/// Inserts the folder, or refreshes name/type/parent of the existing row
/// with the same remote name. The stored checkpoint is never touched.
///
/// Returns the persisted folder, which keeps the existing id on conflict.
pub async fn upsert(db: &Database, folder: &Folder) -> Result<Folder> {
    let folder = folder.clone();

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            INSERT INTO folders (
                id, account_id, name, remote_name, folder_type, parent_id,
                uid_validity, uid_next, unread_count, total_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(account_id, remote_name) DO UPDATE SET
                name = excluded.name,
                folder_type = excluded.folder_type,
                parent_id = excluded.parent_id
            "#,
            params![
                folder.id.0,
                folder.account_id.0,
                folder.name,
                folder.remote_name,
                folder.folder_type.as_str(),
                folder.parent_id.as_ref().map(|p| &p.0),
                folder.uid_validity,
                folder.uid_next,
                folder.unread_count,
                folder.total_count,
            ],
        )?;

        let sql = format!("{SELECT_COLUMNS} WHERE account_id = ?1 AND remote_name = ?2");
        let stored = conn.query_row(
            &sql,
            params![folder.account_id.0, folder.remote_name],
            row_to_folder,
        )?;
        Ok(stored)
    })
    .await
}

/// Retrieves a folder by its ID.
pub async fn get_by_id(db: &Database, folder_id: &FolderId) -> Result<Option<Folder>> {
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let result = conn.query_row(&sql, [&folder_id.0], row_to_folder).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves a folder by its server-side name.
pub async fn get_by_remote_name(
    db: &Database,
    account_id: &AccountId,
    remote_name: &str,
) -> Result<Option<Folder>> {
    let account_id = account_id.clone();
    let remote_name = remote_name.to_string();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE account_id = ?1 AND remote_name = ?2");
        let result = conn
            .query_row(&sql, params![account_id.0, remote_name], row_to_folder)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves a folder by its display name (case-insensitive).
pub async fn get_by_name(
    db: &Database,
    account_id: &AccountId,
    name: &str,
) -> Result<Option<Folder>> {
    let account_id = account_id.clone();
    let name = name.to_string();

    db.with_conn(move |conn| {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE account_id = ?1 AND (name = ?2 COLLATE NOCASE OR remote_name = ?2 COLLATE NOCASE) LIMIT 1"
        );
        let result = conn
            .query_row(&sql, params![account_id.0, name], row_to_folder)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all folders of an account.
pub async fn get_by_account(db: &Database, account_id: &AccountId) -> Result<Vec<Folder>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE account_id = ?1 ORDER BY remote_name");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([&account_id.0], row_to_folder)?;
        let folders: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(folders?)
    })
    .await
}

/// Retrieves the first folder of the given type.
pub async fn get_by_type(
    db: &Database,
    account_id: &AccountId,
    folder_type: FolderType,
) -> Result<Option<Folder>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE account_id = ?1 AND folder_type = ?2 ORDER BY remote_name LIMIT 1"
        );
        let result = conn
            .query_row(
                &sql,
                params![account_id.0, folder_type.as_str()],
                row_to_folder,
            )
            .optional()?;
        Ok(result)
    })
    .await
}

/// Stores a new sync checkpoint.
pub async fn set_checkpoint(
    db: &Database,
    folder_id: &FolderId,
    uid_validity: u32,
    uid_next: u32,
) -> Result<()> {
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE folders SET uid_validity = ?1, uid_next = ?2 WHERE id = ?3",
            params![uid_validity, uid_next, folder_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Recomputes unread and total counters from the stored messages.
pub async fn refresh_counts(db: &Database, folder_id: &FolderId) -> Result<(u32, u32)> {
    let folder_id = folder_id.clone();

    db.with_conn(move |conn| {
        let (total, unread): (u32, u32) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0)
            FROM messages WHERE folder_id = ?1
            "#,
            [&folder_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        conn.execute(
            "UPDATE folders SET unread_count = ?1, total_count = ?2 WHERE id = ?3",
            params![unread, total, folder_id.0],
        )?;
        Ok((unread, total))
    })
    .await
}

fn row_to_folder(row: &Row<'_>) -> std::result::Result<Folder, rusqlite::Error> {
    let folder_type: String = row.get(4)?;
    let parent_id: Option<String> = row.get(5)?;

    Ok(Folder {
        id: FolderId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        name: row.get(2)?,
        remote_name: row.get(3)?,
        folder_type: FolderType::parse(&folder_type),
        parent_id: parent_id.map(FolderId),
        uid_validity: row.get(6)?,
        uid_next: row.get(7)?,
        unread_count: row.get(8)?,
        total_count: row.get(9)?,
    })
}
