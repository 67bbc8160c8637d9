//! Database, blob and credential storage.
//!
//! This module provides the storage layer for the sync engine, including:
//!
//! - SQLite database for accounts, folders, messages, attachments and rules
//! - A content-addressable blob store for cached attachment bodies
//! - OS keychain integration for the credential vault key
//! - Async-safe database operations via tokio::task::spawn_blocking

mod blob;
mod database;
mod keychain;
pub mod queries;
mod schema;

pub use blob::{content_key, BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use database::{Database, DatabaseError, Result};
pub use keychain::{KeychainAccess, KeychainError};
