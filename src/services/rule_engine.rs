//! Filter rules applied to incoming messages.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    Condition, Email, Folder, FolderType, MatchMode, Rule, RuleAction, RuleField, RuleId,
    RuleOperator,
};
use crate::storage::queries::{folders, labels, messages, rules};
use crate::storage::{Database, DatabaseError};

/// Errors raised by the rule engine.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule not found: {0}")]
    NotFound(RuleId),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

/// What happened to one message during rule evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Rules that matched, in evaluation order.
    pub matched: Vec<RuleId>,
    /// The message was deleted by a rule.
    pub deleted: bool,
}

/// Evaluates stored rules and applies their actions.
#[derive(Clone)]
pub struct RuleEngine {
    db: Arc<Database>,
}

impl RuleEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Runs every enabled rule of the message's account against `email`,
    /// lowest priority first.
    ///
    /// `preview` stands in for the body when it has not been downloaded
    /// yet, so body conditions can fire on new mail.
    pub async fn apply(&self, email: &Email, preview: Option<&str>) -> Result<RuleOutcome> {
        let rules = rules::get_enabled(&self.db, &email.account_id).await?;
        let mut outcome = RuleOutcome::default();

        for rule in &rules {
            if !CompiledRule::new(rule).matches(email, preview) {
                continue;
            }
            debug!(rule = %rule.name, email_id = %email.id, "rule matched");
            outcome.matched.push(rule.id.clone());

            if self.run_actions(rule, email).await? {
                outcome.deleted = true;
                break;
            }
            if rule.stop_processing {
                break;
            }
        }
        Ok(outcome)
    }

    /// Re-runs one rule against every stored message of its account.
    ///
    /// Returns the number of messages the rule matched.
    pub async fn apply_rule_now(&self, rule_id: &RuleId) -> Result<usize> {
        let rule = rules::get_by_id(&self.db, rule_id)
            .await?
            .ok_or_else(|| RuleError::NotFound(rule_id.clone()))?;

        let compiled = CompiledRule::new(&rule);
        let emails = messages::get_by_account(&self.db, &rule.account_id).await?;
        let mut matched = 0;
        for email in emails.iter().filter(|e| compiled.matches(e, None)) {
            self.run_actions(&rule, email).await?;
            matched += 1;
        }

        info!(rule = %rule.name, matched, "rule applied to existing messages");
        Ok(matched)
    }

    /// Applies the actions of `rule` in order. Returns true when the message
    /// was deleted, which ends the action list.
    async fn run_actions(&self, rule: &Rule, email: &Email) -> Result<bool> {
        for action in &rule.actions {
            match action {
                RuleAction::AssignLabel { label } => {
                    let label = labels::get_or_create(&self.db, &email.account_id, label).await?;
                    labels::attach(&self.db, &email.id, &label.id).await?;
                }
                RuleAction::MoveToFolder { folder } => {
                    let target = self.folder_named(email, folder).await?;
                    messages::set_folder(&self.db, &email.id, &target.id).await?;
                }
                RuleAction::Star => messages::set_starred(&self.db, &email.id, true).await?,
                RuleAction::MarkRead => messages::set_read(&self.db, &email.id, true).await?,
                RuleAction::Delete => {
                    messages::delete(&self.db, &email.id).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn folder_named(&self, email: &Email, name: &str) -> Result<Folder> {
        if let Some(folder) = folders::get_by_name(&self.db, &email.account_id, name).await? {
            return Ok(folder);
        }
        let folder = Folder::new(email.account_id.clone(), name, FolderType::Custom);
        Ok(folders::upsert(&self.db, &folder).await?)
    }
}

/// Returns true when `email` satisfies the rule's conditions.
///
/// A rule without conditions never matches.
pub fn matches(rule: &Rule, email: &Email) -> bool {
    CompiledRule::new(rule).matches(email, None)
}

/// A rule with its regex conditions compiled, reusable across messages.
struct CompiledRule<'r> {
    rule: &'r Rule,
    /// One slot per condition; `Some` only for valid regex conditions.
    patterns: Vec<Option<Regex>>,
}

impl<'r> CompiledRule<'r> {
    fn new(rule: &'r Rule) -> Self {
        let patterns = rule
            .conditions
            .iter()
            .map(|c| match c.operator {
                RuleOperator::Regex => compile(&rule.name, &c.value),
                _ => None,
            })
            .collect();
        Self { rule, patterns }
    }

    fn matches(&self, email: &Email, preview: Option<&str>) -> bool {
        if self.rule.conditions.is_empty() {
            return false;
        }
        let mut results = self
            .rule
            .conditions
            .iter()
            .zip(&self.patterns)
            .map(|(condition, pattern)| condition_holds(condition, pattern.as_ref(), email, preview));
        match self.rule.match_mode {
            MatchMode::All => results.all(|held| held),
            MatchMode::Any => results.any(|held| held),
        }
    }
}

fn compile(rule: &str, pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).build() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(rule, pattern, error = %e, "invalid rule regex");
            None
        }
    }
}

fn field_values(field: RuleField, email: &Email, preview: Option<&str>) -> Vec<String> {
    match field {
        RuleField::From => vec![email.from.email.clone(), email.from.display()],
        RuleField::To => email
            .to
            .iter()
            .chain(email.cc.iter())
            .flat_map(|a| [a.email.clone(), a.display()])
            .collect(),
        RuleField::Subject => vec![email.subject.clone().unwrap_or_default()],
        RuleField::Body => vec![email
            .body_text
            .as_deref()
            .or(preview)
            .unwrap_or(&email.snippet)
            .to_string()],
    }
}

fn condition_holds(
    condition: &Condition,
    pattern: Option<&Regex>,
    email: &Email,
    preview: Option<&str>,
) -> bool {
    let values = field_values(condition.field, email, preview);

    if condition.operator == RuleOperator::Regex {
        return pattern.is_some_and(|re| values.iter().any(|v| re.is_match(v)));
    }

    let needle = condition.value.to_lowercase();
    values.iter().map(|v| v.to_lowercase()).any(|v| match condition.operator {
        RuleOperator::Contains => v.contains(&needle),
        RuleOperator::Equals => v == needle,
        RuleOperator::StartsWith => v.starts_with(&needle),
        RuleOperator::EndsWith => v.ends_with(&needle),
        RuleOperator::Regex => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, Address, FolderId};
    use crate::storage::queries::test_support::{make_email, seed_account, seed_folder};

    fn sample() -> Email {
        let mut email = make_email(&AccountId::from("a"), &FolderId::from("f"), 1, "m@x");
        email.from = Address::with_name("News@Example.com", "Weekly News");
        email.subject = Some("Your Weekly Digest".to_string());
        email.body_text = Some("Unsubscribe at any time".to_string());
        email
    }

    fn rule() -> Rule {
        Rule::new(AccountId::from("a"), "test")
    }

    #[test]
    fn operators_ignore_case() {
        let email = sample();
        for (op, value) in [
            (RuleOperator::Contains, "weekly"),
            (RuleOperator::Equals, "news@example.com"),
            (RuleOperator::StartsWith, "NEWS@"),
            (RuleOperator::EndsWith, "@EXAMPLE.COM"),
        ] {
            let r = rule().when(RuleField::From, op, value);
            assert!(matches(&r, &email), "{:?} {}", op, value);
        }
    }

    #[test]
    fn regex_is_case_sensitive() {
        let email = sample();
        assert!(matches(
            &rule().when(RuleField::Subject, RuleOperator::Regex, r"^Your \w+ Digest$"),
            &email
        ));
        assert!(!matches(
            &rule().when(RuleField::Subject, RuleOperator::Regex, "digest"),
            &email
        ));
    }

    #[test]
    fn invalid_regex_is_false() {
        let email = sample();
        let r = rule()
            .match_mode(MatchMode::Any)
            .when(RuleField::Subject, RuleOperator::Regex, "([")
            .when(RuleField::Body, RuleOperator::Contains, "unsubscribe");
        assert!(matches(&r, &email));

        let r = rule().when(RuleField::Subject, RuleOperator::Regex, "([");
        assert!(!matches(&r, &email));
    }

    #[test]
    fn regex_conditions_are_compiled_once_per_rule() {
        let r = rule()
            .match_mode(MatchMode::Any)
            .when(RuleField::Subject, RuleOperator::Regex, r"Digest$")
            .when(RuleField::From, RuleOperator::Contains, "nobody")
            .when(RuleField::Body, RuleOperator::Regex, "([");
        let compiled = CompiledRule::new(&r);
        let slots: Vec<bool> = compiled.patterns.iter().map(Option::is_some).collect();
        assert_eq!(slots, vec![true, false, false]);

        // The compiled form is reused across messages.
        let mut other = sample();
        other.subject = Some("Receipt".to_string());
        assert!(compiled.matches(&sample(), None));
        assert!(!compiled.matches(&other, None));
    }

    #[test]
    fn body_conditions_use_the_preview_until_the_body_is_stored() {
        let mut email = sample();
        email.body_text = None;
        email.snippet = String::new();
        let r = rule().when(RuleField::Body, RuleOperator::Contains, "urgent");
        let compiled = CompiledRule::new(&r);

        assert!(!compiled.matches(&email, None));
        assert!(compiled.matches(&email, Some("This is URGENT, please reply")));

        email.body_text = Some("nothing pressing".to_string());
        assert!(!compiled.matches(&email, Some("This is URGENT, please reply")));
    }

    #[test]
    fn all_requires_every_condition() {
        let email = sample();
        let both = rule()
            .when(RuleField::From, RuleOperator::Contains, "news")
            .when(RuleField::Subject, RuleOperator::Contains, "digest");
        assert!(matches(&both, &email));

        let one = rule()
            .when(RuleField::From, RuleOperator::Contains, "news")
            .when(RuleField::Subject, RuleOperator::Contains, "invoice");
        assert!(!matches(&one, &email));
        assert!(matches(&one.clone().match_mode(MatchMode::Any), &email));
    }

    #[test]
    fn empty_rule_never_matches() {
        assert!(!matches(&rule(), &sample()));
    }

    #[tokio::test]
    async fn actions_apply_in_order_and_stop_processing_halts() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let account = seed_account(&db).await;
        let inbox = seed_folder(&db, &account, "INBOX").await;
        let engine = RuleEngine::new(db.clone());

        let mut email = make_email(&account, &inbox, 1, "m@x");
        email.subject = Some("Invoice 42".to_string());
        messages::insert_if_absent(&db, &email).await.unwrap();

        let first = Rule::new(account.clone(), "invoices")
            .priority(1)
            .when(RuleField::Subject, RuleOperator::StartsWith, "invoice")
            .then(RuleAction::AssignLabel {
                label: "Billing".to_string(),
            })
            .then(RuleAction::MoveToFolder {
                folder: "Receipts".to_string(),
            })
            .then(RuleAction::Star)
            .then(RuleAction::MarkRead)
            .stop();
        let second = Rule::new(account.clone(), "never reached")
            .priority(2)
            .when(RuleField::Subject, RuleOperator::Contains, "invoice")
            .then(RuleAction::Delete);
        rules::save(&db, &first).await.unwrap();
        rules::save(&db, &second).await.unwrap();

        let outcome = engine.apply(&email, None).await.unwrap();
        assert_eq!(outcome.matched, vec![first.id.clone()]);
        assert!(!outcome.deleted);

        let stored = messages::get_by_id(&db, &email.id).await.unwrap().unwrap();
        assert!(stored.is_starred);
        assert!(stored.is_read);
        let receipts = folders::get_by_name(&db, &account, "Receipts")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.folder_id, receipts.id);
        assert_eq!(receipts.folder_type, FolderType::Custom);

        let attached = labels::get_for_message(&db, &email.id).await.unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].name, "Billing");
    }

    #[tokio::test]
    async fn delete_ends_actions() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let account = seed_account(&db).await;
        let inbox = seed_folder(&db, &account, "INBOX").await;
        let engine = RuleEngine::new(db.clone());

        let email = make_email(&account, &inbox, 1, "m@x");
        messages::insert_if_absent(&db, &email).await.unwrap();

        let r = Rule::new(account.clone(), "purge")
            .when(RuleField::From, RuleOperator::Contains, "sender@")
            .then(RuleAction::Delete)
            .then(RuleAction::Star);
        rules::save(&db, &r).await.unwrap();

        let outcome = engine.apply(&email, None).await.unwrap();
        assert!(outcome.deleted);
        assert!(messages::get_by_id(&db, &email.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_rule_now_covers_existing_messages() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let account = seed_account(&db).await;
        let inbox = seed_folder(&db, &account, "INBOX").await;
        let engine = RuleEngine::new(db.clone());

        for uid in 1..=3 {
            let mut email = make_email(&account, &inbox, uid, &format!("m{}@x", uid));
            if uid == 2 {
                email.subject = Some("Other".to_string());
            }
            messages::insert_if_absent(&db, &email).await.unwrap();
        }

        let r = Rule::new(account.clone(), "star hello")
            .when(RuleField::Subject, RuleOperator::Equals, "hello")
            .then(RuleAction::Star);
        rules::save(&db, &r).await.unwrap();

        assert_eq!(engine.apply_rule_now(&r.id).await.unwrap(), 2);
        let starred = messages::get_by_account(&db, &account)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.is_starred)
            .count();
        assert_eq!(starred, 2);

        assert!(matches!(
            engine.apply_rule_now(&RuleId::from("missing")).await,
            Err(RuleError::NotFound(_))
        ));
    }
}
