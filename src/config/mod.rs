//! Configuration and settings management.
//!
//! Settings are stored in the user's config directory as JSON and can be
//! overridden through environment variables.

mod settings;

pub use settings::{
    ConfigError, OutboundSettings, PoolSettings, Settings, StorageSettings, SyncSettings,
    VaultSettings, DATABASE_ENV, VAULT_KEY_ENV,
};
