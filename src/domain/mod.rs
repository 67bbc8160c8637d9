//! Domain layer types for the sync engine.
//!
//! This module contains the core domain types used throughout the crate,
//! including account, folder, email, rule, label and thread entities.

mod account;
mod email;
mod folder;
mod label;
mod rule;
mod thread;
mod types;

pub use account::{Account, ServerEndpoint, SmtpSecurity};
pub use email::{Address, Attachment, Email};
pub use folder::{display_name, Folder, FolderType};
pub use label::Label;
pub use rule::{Condition, MatchMode, Rule, RuleAction, RuleField, RuleOperator};
pub use thread::{Thread, ThreadSummary};
pub use types::{
    normalize_message_id, AccountId, AttachmentId, EmailId, FolderId, LabelId, MessageId,
    PendingSendId, RuleId, ThreadId,
};
