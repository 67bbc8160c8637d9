//! Account CRUD operations.
//!
//! Passwords are written exactly as given. `AccountService` seals them
//! through the vault before they get here.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Account, AccountId, ServerEndpoint};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, email, display_name, username, password,
        imap_host, imap_port, imap_use_tls,
        smtp_host, smtp_port, smtp_use_tls,
        is_default, sync_enabled, last_sync_at, last_sync_error
    FROM accounts
"#;

/// Inserts a new account into the database.
pub async fn insert(db: &Database, account: &Account) -> Result<()> {
    let account = account.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO accounts (
                id, email, display_name, username, password,
                imap_host, imap_port, imap_use_tls,
                smtp_host, smtp_port, smtp_use_tls,
                is_default, sync_enabled, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15
            )
            "#,
            params![
                account.id.0,
                account.email,
                account.display_name,
                account.username,
                account.password,
                account.imap.host,
                account.imap.port,
                account.imap.use_tls as i32,
                account.smtp.host,
                account.smtp.port,
                account.smtp.use_tls as i32,
                account.is_default as i32,
                account.sync_enabled as i32,
                now,
                now,
            ],
        )?;

        Ok(())
    })
    .await
}

/// Retrieves an account by its ID.
pub async fn get_by_id(db: &Database, account_id: &AccountId) -> Result<Option<Account>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row([&account_id.0], row_to_account).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all accounts.
pub async fn get_all(db: &Database) -> Result<Vec<Account>> {
    db.with_conn(|conn| {
        let sql = format!("{SELECT_COLUMNS} ORDER BY email");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_account)?;
        let accounts: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(accounts?)
    })
    .await
}

/// Retrieves accounts with background sync enabled.
pub async fn get_sync_enabled(db: &Database) -> Result<Vec<Account>> {
    db.with_conn(|conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE sync_enabled = 1 ORDER BY email");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_account)?;
        let accounts: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(accounts?)
    })
    .await
}

/// Replaces the stored password.
pub async fn update_password(db: &Database, account_id: &AccountId, password: &str) -> Result<()> {
    let account_id = account_id.clone();
    let password = password.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE accounts SET password = ?1, updated_at = ?2 WHERE id = ?3",
            params![password, Utc::now().to_rfc3339(), account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Records the outcome of a sync attempt.
///
/// `error = None` clears any previous error.
pub async fn set_sync_status(
    db: &Database,
    account_id: &AccountId,
    at: DateTime<Utc>,
    error: Option<&str>,
) -> Result<()> {
    let account_id = account_id.clone();
    let error = error.map(|s| s.to_string());

    db.with_conn(move |conn| {
        conn.execute(
            r#"
            UPDATE accounts
            SET last_sync_at = ?1, last_sync_error = ?2, updated_at = ?1
            WHERE id = ?3
            "#,
            params![at.to_rfc3339(), error, account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Deletes an account and, through cascades, everything mirrored for it.
pub async fn delete(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM accounts WHERE id = ?1", [&account_id.0])?;
        Ok(())
    })
    .await
}

fn row_to_account(row: &Row<'_>) -> std::result::Result<Account, rusqlite::Error> {
    let last_sync_at: Option<String> = row.get(13)?;

    Ok(Account {
        id: AccountId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        imap: ServerEndpoint {
            host: row.get(5)?,
            port: row.get(6)?,
            use_tls: row.get::<_, i32>(7)? != 0,
        },
        smtp: ServerEndpoint {
            host: row.get(8)?,
            port: row.get(9)?,
            use_tls: row.get::<_, i32>(10)? != 0,
        },
        is_default: row.get::<_, i32>(11)? != 0,
        sync_enabled: row.get::<_, i32>(12)? != 0,
        last_sync_at: last_sync_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        last_sync_error: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_account() -> Account {
        Account::new(
            "user@example.com",
            "enc:v1:abc",
            ServerEndpoint::imap_tls("imap.example.com"),
            ServerEndpoint::smtp_submission("smtp.example.com"),
        )
    }

    #[tokio::test]
    async fn insert_and_get_account() {
        let db = Database::open_in_memory().await.unwrap();
        let account = make_account();

        insert(&db, &account).await.unwrap();

        let loaded = get_by_id(&db, &account.id).await.unwrap().unwrap();
        assert_eq!(loaded.email, "user@example.com");
        assert_eq!(loaded.password, "enc:v1:abc");
        assert_eq!(loaded.imap, account.imap);
        assert_eq!(loaded.smtp, account.smtp);
        assert!(loaded.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn get_nonexistent_account_returns_none() {
        let db = Database::open_in_memory().await.unwrap();
        let result = get_by_id(&db, &AccountId::from("missing")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn sync_status_is_recorded_and_cleared() {
        let db = Database::open_in_memory().await.unwrap();
        let account = make_account();
        insert(&db, &account).await.unwrap();

        set_sync_status(&db, &account.id, Utc::now(), Some("login failed"))
            .await
            .unwrap();
        let loaded = get_by_id(&db, &account.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_sync_error.as_deref(), Some("login failed"));
        assert!(loaded.last_sync_at.is_some());

        set_sync_status(&db, &account.id, Utc::now(), None).await.unwrap();
        let loaded = get_by_id(&db, &account.id).await.unwrap().unwrap();
        assert!(loaded.last_sync_error.is_none());
    }

    #[tokio::test]
    async fn only_enabled_accounts_are_listed_for_sync() {
        let db = Database::open_in_memory().await.unwrap();
        let enabled = make_account();
        let mut disabled = make_account();
        disabled.id = AccountId::generate();
        disabled.email = "other@example.com".to_string();
        disabled.sync_enabled = false;

        insert(&db, &enabled).await.unwrap();
        insert(&db, &disabled).await.unwrap();

        assert_eq!(get_all(&db).await.unwrap().len(), 2);
        let syncing = get_sync_enabled(&db).await.unwrap();
        assert_eq!(syncing.len(), 1);
        assert_eq!(syncing[0].id, enabled.id);
    }

    #[tokio::test]
    async fn update_password_replaces_value() {
        let db = Database::open_in_memory().await.unwrap();
        let account = make_account();
        insert(&db, &account).await.unwrap();

        update_password(&db, &account.id, "enc:v1:new").await.unwrap();

        let loaded = get_by_id(&db, &account.id).await.unwrap().unwrap();
        assert_eq!(loaded.password, "enc:v1:new");
    }
}
