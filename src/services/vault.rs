//! Credential vault.
//!
//! Account passwords are stored as `enc:v1:` followed by base64 of
//! `nonce || ciphertext`, sealed with AES-256-GCM. The 256-bit key is the
//! SHA-256 of the configured passphrase.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::VAULT_KEY_ENV;
use crate::domain::Account;
use crate::providers::email::Credentials;
use crate::storage::KeychainAccess;

/// Marker for values produced by [`CredentialVault::encrypt`].
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

/// Errors raised by the vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Symmetric encryption for stored credentials.
///
/// Without a key the vault stores values unchanged.
pub struct CredentialVault {
    key: Option<LessSafeKey>,
    rng: SystemRandom,
}

impl CredentialVault {
    /// Creates a vault keyed by `passphrase`, or a pass-through vault.
    pub fn new(passphrase: Option<&str>) -> Self {
        let key = passphrase
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .and_then(|p| {
                let material = digest::digest(&digest::SHA256, p.as_bytes());
                UnboundKey::new(&AES_256_GCM, material.as_ref())
                    .ok()
                    .map(LessSafeKey::new)
            });
        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    /// Creates a vault that stores values unchanged.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Resolves the key from the environment, then `configured`, then the
    /// OS keychain.
    pub async fn from_sources(configured: Option<&str>, keychain: Option<&KeychainAccess>) -> Self {
        if let Ok(key) = std::env::var(VAULT_KEY_ENV) {
            if !key.trim().is_empty() {
                debug!("vault key taken from environment");
                return Self::new(Some(&key));
            }
        }
        if let Some(key) = configured.filter(|k| !k.trim().is_empty()) {
            debug!("vault key taken from settings");
            return Self::new(Some(key));
        }
        if let Some(keychain) = keychain {
            match keychain.vault_key().await {
                Ok(Some(key)) => {
                    debug!("vault key taken from keychain");
                    return Self::new(Some(&key));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not read vault key from keychain"),
            }
        }
        warn!("no vault key configured, credentials are stored unencrypted");
        Self::disabled()
    }

    /// Returns true when a key is configured.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Returns true when `stored` looks like vault output.
    pub fn is_encrypted(stored: &str) -> bool {
        stored.starts_with(CIPHERTEXT_PREFIX)
    }

    /// Encrypts `plaintext`. Without a key the input is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Encryption("random source unavailable".to_string()))?;

        let mut sealed = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut sealed,
        )
        .map_err(|_| VaultError::Encryption("AES-GCM seal failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);
        Ok(format!("{}{}", CIPHERTEXT_PREFIX, BASE64.encode(combined)))
    }

    /// Decrypts a stored value.
    ///
    /// A value without the ciphertext marker is legacy plaintext and is
    /// returned as is. Ciphertext that cannot be opened with the current key
    /// is an error, never a fallback.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(encoded) = stored.strip_prefix(CIPHERTEXT_PREFIX) else {
            if self.is_enabled() {
                warn!("credential stored as plaintext, it will be re-encrypted");
            }
            return Ok(stored.to_string());
        };

        let key = self
            .key
            .as_ref()
            .ok_or_else(|| VaultError::Decryption("no vault key configured".to_string()))?;

        let combined = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::Decryption(format!("invalid encoding: {}", e)))?;
        if combined.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::Decryption("ciphertext too short".to_string()));
        }

        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| VaultError::Decryption("invalid nonce".to_string()))?;
        let mut buffer = sealed.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| VaultError::Decryption("key mismatch or corrupted data".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::Decryption("plaintext is not UTF-8".to_string()))
    }

    /// Login credentials for `account` with its password decrypted.
    pub fn credentials(&self, account: &Account) -> Result<Credentials> {
        let password = self.decrypt(&account.password)?;
        Ok(Credentials::new(account.username.clone(), password))
    }
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::disabled()
    }
}
