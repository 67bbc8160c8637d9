//! Database query modules for CRUD operations.
//!
//! Each module provides async functions that operate on the database.

pub mod accounts;
pub mod attachments;
pub mod folders;
pub mod labels;
pub mod messages;
pub mod rules;
pub mod threads;
