//! Account domain types.
//!
//! Represents mail accounts and their IMAP/SMTP endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// A mail account mirrored by the sync engine.
///
/// `password` always holds the value exactly as persisted: ciphertext when a
/// vault key is configured, legacy plaintext otherwise. Decryption happens in
/// the credential vault right before a connection is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: AccountId,
    /// Email address for this account.
    pub email: String,
    /// Display name used in outgoing `From` headers.
    pub display_name: Option<String>,
    /// Login name for both IMAP and SMTP.
    pub username: String,
    /// Stored (encrypted) password.
    pub password: String,
    /// Incoming server.
    pub imap: ServerEndpoint,
    /// Outgoing server.
    pub smtp: ServerEndpoint,
    /// Whether this is the user's default sending account.
    pub is_default: bool,
    /// Whether background sync is enabled.
    pub sync_enabled: bool,
    /// Time of the last sync attempt.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Error recorded by the last sync attempt, if it failed.
    pub last_sync_error: Option<String>,
}

/// Host, port and TLS flag for one protocol endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether to use TLS.
    pub use_tls: bool,
}

impl ServerEndpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
        }
    }

    /// Typical implicit-TLS IMAP endpoint (port 993).
    pub fn imap_tls(host: impl Into<String>) -> Self {
        Self::new(host, 993, true)
    }

    /// Typical submission endpoint with STARTTLS (port 587).
    pub fn smtp_submission(host: impl Into<String>) -> Self {
        Self::new(host, 587, true)
    }

    /// Returns the SMTP security mode implied by this endpoint.
    ///
    /// Port 465 with TLS is implicit TLS, any other TLS port negotiates
    /// STARTTLS, and no TLS means plaintext.
    pub fn smtp_security(&self) -> SmtpSecurity {
        match (self.use_tls, self.port) {
            (true, 465) => SmtpSecurity::ImplicitTls,
            (true, _) => SmtpSecurity::StartTls,
            (false, _) => SmtpSecurity::Plain,
        }
    }
}

/// How an SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// TLS from the first byte (SMTPS).
    ImplicitTls,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// No transport security.
    Plain,
}

impl Account {
    /// Creates an account with sync enabled and no sync history.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        imap: ServerEndpoint,
        smtp: ServerEndpoint,
    ) -> Self {
        let email = email.into();
        Self {
            id: AccountId::generate(),
            username: email.clone(),
            email,
            display_name: None,
            password: password.into(),
            imap,
            smtp,
            is_default: false,
            sync_enabled: true,
            last_sync_at: None,
            last_sync_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_serialization() {
        let account = Account::new(
            "test@example.com",
            "secret",
            ServerEndpoint::imap_tls("imap.example.com"),
            ServerEndpoint::smtp_submission("smtp.example.com"),
        );

        let json = serde_json::to_string(&account).unwrap();
        let deserialized: Account = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.email, "test@example.com");
        assert_eq!(deserialized.username, "test@example.com");
        assert_eq!(deserialized.imap.port, 993);
        assert!(deserialized.sync_enabled);
    }

    #[test]
    fn smtp_security_from_endpoint() {
        assert_eq!(
            ServerEndpoint::new("smtp.example.com", 465, true).smtp_security(),
            SmtpSecurity::ImplicitTls
        );
        assert_eq!(
            ServerEndpoint::new("smtp.example.com", 587, true).smtp_security(),
            SmtpSecurity::StartTls
        );
        assert_eq!(
            ServerEndpoint::new("localhost", 25, false).smtp_security(),
            SmtpSecurity::Plain
        );
    }
}
