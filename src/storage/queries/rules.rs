//! Filter rule CRUD operations.

use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, Condition, MatchMode, Rule, RuleAction, RuleId};
use crate::storage::database::{Database, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, account_id, name, enabled, priority, match_mode,
        conditions_json, actions_json, stop_processing
    FROM rules
"#;

/// Inserts or replaces a rule.
pub async fn save(db: &Database, rule: &Rule) -> Result<()> {
    let rule = rule.clone();

    db.with_conn(move |conn| {
        let conditions_json = serde_json::to_string(&rule.conditions)?;
        let actions_json = serde_json::to_string(&rule.actions)?;

        conn.execute(
            r#"
            INSERT INTO rules (
                id, account_id, name, enabled, priority, match_mode,
                conditions_json, actions_json, stop_processing
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                enabled = excluded.enabled,
                priority = excluded.priority,
                match_mode = excluded.match_mode,
                conditions_json = excluded.conditions_json,
                actions_json = excluded.actions_json,
                stop_processing = excluded.stop_processing
            "#,
            params![
                rule.id.0,
                rule.account_id.0,
                rule.name,
                rule.enabled as i32,
                rule.priority,
                rule.match_mode.as_str(),
                conditions_json,
                actions_json,
                rule.stop_processing as i32,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a rule by its ID.
pub async fn get_by_id(db: &Database, rule_id: &RuleId) -> Result<Option<Rule>> {
    let rule_id = rule_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let rule = conn.query_row(&sql, [&rule_id.0], row_to_rule).optional()?;
        Ok(rule)
    })
    .await
}

/// Retrieves the enabled rules of an account in evaluation order.
pub async fn get_enabled(db: &Database, account_id: &AccountId) -> Result<Vec<Rule>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE account_id = ?1 AND enabled = 1 ORDER BY priority ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([&account_id.0], row_to_rule)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Deletes a rule.
pub async fn delete(db: &Database, rule_id: &RuleId) -> Result<()> {
    let rule_id = rule_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM rules WHERE id = ?1", [&rule_id.0])?;
        Ok(())
    })
    .await
}

fn row_to_rule(row: &Row<'_>) -> std::result::Result<Rule, rusqlite::Error> {
    let match_mode: String = row.get(5)?;
    let conditions_json: String = row.get(6)?;
    let actions_json: String = row.get(7)?;

    let conditions: Vec<Condition> = serde_json::from_str(&conditions_json).unwrap_or_default();
    let actions: Vec<RuleAction> = serde_json::from_str(&actions_json).unwrap_or_default();

    Ok(Rule {
        id: RuleId(row.get(0)?),
        account_id: AccountId(row.get(1)?),
        name: row.get(2)?,
        enabled: row.get::<_, i32>(3)? != 0,
        priority: row.get(4)?,
        match_mode: MatchMode::parse(&match_mode),
        conditions,
        actions,
        stop_processing: row.get::<_, i32>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RuleField, RuleOperator};
    use crate::storage::queries::test_support::seed_account;

    #[tokio::test]
    async fn save_and_load_rule() {
        let db = Database::open_in_memory().await.unwrap();
        let account_id = seed_account(&db).await;

        let rule = Rule::new(account_id.clone(), "Invoices")
            .match_mode(MatchMode::Any)
            .when(RuleField::Subject, RuleOperator::Contains, "invoice")
            .then(RuleAction::AssignLabel {
                label: "Finance".to_string(),
            })
            .stop();
        save(&db, &rule).await.unwrap();

        let loaded = get_by_id(&db, &rule.id).await.unwrap().unwrap();
        assert_eq!(loaded, rule);
    }

    #[tokio::test]
    async fn enabled_rules_are_priority_ordered() {
        let db = Database::open_in_memory().await.unwrap();
        let account_id = seed_account(&db).await;

        let late = Rule::new(account_id.clone(), "late").priority(10);
        let early = Rule::new(account_id.clone(), "early").priority(1);
        let mut off = Rule::new(account_id.clone(), "off");
        off.enabled = false;

        save(&db, &late).await.unwrap();
        save(&db, &early).await.unwrap();
        save(&db, &off).await.unwrap();

        let names: Vec<String> = get_enabled(&db, &account_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);

        delete(&db, &early.id).await.unwrap();
        assert_eq!(get_enabled(&db, &account_id).await.unwrap().len(), 1);
    }
}
