//! Filter rule domain types.
//!
//! A rule is an ordered list of conditions combined by a match mode, plus an
//! ordered list of actions applied when the rule matches.

use serde::{Deserialize, Serialize};

use super::{AccountId, RuleId};

/// A user-defined filter rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for this rule.
    pub id: RuleId,
    /// Account the rule applies to.
    pub account_id: AccountId,
    /// Human readable name.
    pub name: String,
    /// Disabled rules are never evaluated.
    pub enabled: bool,
    /// Evaluation order; lower runs first.
    pub priority: i32,
    /// How conditions combine.
    pub match_mode: MatchMode,
    /// Conditions in evaluation order.
    pub conditions: Vec<Condition>,
    /// Actions in application order.
    pub actions: Vec<RuleAction>,
    /// Halts evaluation of lower-priority rules after a match.
    pub stop_processing: bool,
}

impl Rule {
    /// Creates an enabled rule with no conditions or actions.
    pub fn new(account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id: RuleId::generate(),
            account_id,
            name: name.into(),
            enabled: true,
            priority: 0,
            match_mode: MatchMode::All,
            conditions: Vec::new(),
            actions: Vec::new(),
            stop_processing: false,
        }
    }

    /// Sets the match mode.
    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Appends a condition.
    pub fn when(mut self, field: RuleField, operator: RuleOperator, value: impl Into<String>) -> Self {
        self.conditions.push(Condition {
            field,
            operator,
            value: value.into(),
        });
        self
    }

    /// Appends an action.
    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Stops evaluation of later rules after this one matches.
    pub fn stop(mut self) -> Self {
        self.stop_processing = true;
        self
    }
}

/// How a rule's conditions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every condition must hold.
    All,
    /// At least one condition must hold.
    Any,
}

impl MatchMode {
    /// Returns the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    /// Parses a stored match mode, defaulting to [`MatchMode::All`].
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("any") {
            Self::Any
        } else {
            Self::All
        }
    }
}

/// A single test against one message field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Field under test.
    pub field: RuleField,
    /// Comparison operator.
    pub operator: RuleOperator,
    /// Operand (pattern for regex).
    pub value: String,
}

/// Message field a condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    From,
    To,
    Subject,
    Body,
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

/// Action applied when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Attach a label (created on demand).
    AssignLabel { label: String },
    /// Move the message to another folder of the same account.
    MoveToFolder { folder: String },
    /// Star the message.
    Star,
    /// Mark the message as read.
    MarkRead,
    /// Delete the message.
    Delete,
}
