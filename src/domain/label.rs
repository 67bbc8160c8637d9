//! Label domain types.
//!
//! Labels are local tags attached to messages, usually by filter rules.

use serde::{Deserialize, Serialize};

use super::{AccountId, LabelId};

/// A local message label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Unique identifier for this label.
    pub id: LabelId,
    /// Account this label belongs to.
    pub account_id: AccountId,
    /// Display name, unique per account.
    pub name: String,
    /// Color for UI display (hex format, e.g., "#ff0000").
    pub color: Option<String>,
}

impl Label {
    /// Creates an uncolored label.
    pub fn new(account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id: LabelId::generate(),
            account_id,
            name: name.into(),
            color: None,
        }
    }
}
