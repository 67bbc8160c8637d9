//! External service providers.
//!
//! - [`email`] - IMAP and SMTP access

pub mod email;
