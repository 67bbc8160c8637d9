//! Engine settings.
//!
//! Settings are persisted to `settings.json` in the platform config
//! directory (`~/.config/mailsync/` or the OS equivalent) and loaded at
//! startup. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Overrides the database path.
pub const DATABASE_ENV: &str = "MAILSYNC_DATABASE";

/// Overrides the vault key.
pub const VAULT_KEY_ENV: &str = "MAILSYNC_VAULT_KEY";

const SETTINGS_FILE: &str = "settings.json";

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no home directory to derive config paths from")]
    NoProjectDirs,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Background sync.
    pub sync: SyncSettings,
    /// IMAP connection pool.
    pub pool: PoolSettings,
    /// Outgoing mail.
    pub outbound: OutboundSettings,
    /// Credential encryption.
    pub vault: VaultSettings,
    /// Database and blob locations.
    pub storage: StorageSettings,
}

/// Background sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Whether background sync runs.
    pub enabled: bool,
    /// Seconds between "sync all accounts" rounds.
    pub interval_seconds: u64,
    /// Whether the sent-mail mailbox gets its own pass.
    pub sync_sent: bool,
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            sync_sent: true,
        }
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Concurrent IMAP sessions allowed per account.
    pub max_per_account: usize,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_per_account: 3,
            connect_attempts: 3,
        }
    }
}

/// Outgoing mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundSettings {
    /// Undo window for queued sends, in seconds.
    pub undo_delay_seconds: u64,
}

impl OutboundSettings {
    pub fn undo_delay(&self) -> Duration {
        Duration::from_secs(self.undo_delay_seconds)
    }
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            undo_delay_seconds: 10,
        }
    }
}

/// Credential vault configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Passphrase the encryption key is derived from. Prefer the
    /// environment variable or the OS keychain.
    pub key: Option<String>,
    /// Look the key up in the OS keychain when nothing else provides one.
    pub use_keychain: bool,
}

/// File locations. Relative paths resolve against the data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Attachment blob directory.
    pub blob_dir: Option<PathBuf>,
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "mailsync", "mailsync").ok_or(ConfigError::NoProjectDirs)
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from the default location, then applies environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&Self::default_path()?)?;
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Loads settings from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies `MAILSYNC_DATABASE` and `MAILSYNC_VAULT_KEY`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(DATABASE_ENV).filter(|p| !p.trim().is_empty()) {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(key) = var(VAULT_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.vault.key = Some(key);
        }
    }

    /// Resolved database path.
    pub fn database_path(&self) -> Result<PathBuf> {
        let data_dir = project_dirs()?.data_dir().to_path_buf();
        Ok(resolve(&data_dir, self.storage.database_path.as_deref(), "mailsync.db"))
    }

    /// Resolved blob directory.
    pub fn blob_dir(&self) -> Result<PathBuf> {
        let data_dir = project_dirs()?.data_dir().to_path_buf();
        Ok(resolve(&data_dir, self.storage.blob_dir.as_deref(), "blobs"))
    }
}

fn resolve(base: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => base.join(path),
        None => base.join(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.sync.enabled);
        assert_eq!(settings.pool.connect_attempts, 3);
        assert_eq!(settings.outbound.undo_delay(), Duration::from_secs(10));
        assert!(settings.vault.key.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"pool": {"max_per_account": 5}, "sync": {"interval_seconds": 60}}"#)
            .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.pool.max_per_account, 5);
        assert_eq!(settings.pool.connect_attempts, 3);
        assert_eq!(settings.sync.interval(), Duration::from_secs(60));
        assert!(settings.sync.sync_sent);
    }

    #[test]
    fn missing_file_is_default_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.outbound.undo_delay_seconds, 10);

        settings.outbound.undo_delay_seconds = 30;
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap().outbound.undo_delay_seconds, 30);
    }

    #[test]
    fn env_overrides() {
        let mut settings = Settings::default();
        settings.apply_env(|name| match name {
            DATABASE_ENV => Some("/tmp/other.db".to_string()),
            VAULT_KEY_ENV => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(settings.storage.database_path, Some(PathBuf::from("/tmp/other.db")));
        assert_eq!(settings.vault.key.as_deref(), Some("from-env"));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/data");
        assert_eq!(resolve(base, None, "mailsync.db"), PathBuf::from("/data/mailsync.db"));
        assert_eq!(resolve(base, Some(Path::new("x.db")), "d"), PathBuf::from("/data/x.db"));
        assert_eq!(resolve(base, Some(Path::new("/abs/x.db")), "d"), PathBuf::from("/abs/x.db"));
    }
}
