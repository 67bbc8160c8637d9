//! mailsync - IMAP/SMTP synchronization engine
//!
//! This crate mirrors remote mail accounts into a local SQLite store. It
//! provides incremental folder sync, conversation threading, on-demand body
//! and attachment download, user filter rules and outbound mail with an
//! undo window.

pub mod config;
pub mod domain;
pub mod mime;
pub mod providers;
pub mod services;
pub mod storage;
