//! mailsync - Entry point for the headless sync daemon

use std::sync::Arc;

use anyhow::Context;
use mailsync::config::Settings;
use mailsync::providers::email::ImapConnector;
use mailsync::services::{ConnectionPool, CredentialVault, SyncService};
use mailsync::storage::{Database, KeychainAccess};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting mailsync");

    let settings = Settings::load().context("loading settings")?;
    let db_path = settings.database_path()?;
    let db = Arc::new(
        Database::open(&db_path)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );

    let keychain = settings.vault.use_keychain.then(KeychainAccess::new);
    let vault = Arc::new(
        CredentialVault::from_sources(settings.vault.key.as_deref(), keychain.as_ref()).await,
    );
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(ImapConnector::new()),
        settings.pool.clone(),
    ));
    let sync = Arc::new(SyncService::new(db, pool, vault, settings.sync.clone()));

    Arc::clone(&sync).start_background_sync().await;
    if !sync.is_background_sync_running().await {
        tracing::info!("Background sync is disabled in settings, exiting");
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down");
    sync.stop_background_sync().await;

    Ok(())
}
