//! Risk-control records: rules, blacklist entries and evaluation logs.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::models::now;
use crate::schema::{blacklists, risk_logs, risk_rules};

pub const RULE_TYPE_AMOUNT_LIMIT: &str = "amount_limit";
pub const RULE_TYPE_FREQUENCY_LIMIT: &str = "frequency_limit";
pub const RULE_TYPE_CUSTOM: &str = "custom";

pub const ACTION_BLOCK: &str = "block";
pub const ACTION_REVIEW: &str = "review";
pub const ACTION_LOG: &str = "log";

pub const BLACKLIST_ADDRESS: &str = "address";
pub const BLACKLIST_USER: &str = "user";
pub const BLACKLIST_IP: &str = "ip";
pub const BLACKLIST_DEVICE: &str = "device";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = risk_rules)]
pub struct RiskRule {
    pub id: i64,
    pub name: String,
    pub rule_type: String,
    /// Empty string = any chain
    pub chain: String,
    /// Empty string = any currency
    pub currency: String,
    /// Declarative JSON condition, e.g. {"max_amount":"1000"}
    pub condition: String,
    pub action: String,
    pub risk_level: i32,
    pub priority: i32,
    pub status: String,
    pub description: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = risk_rules)]
pub struct NewRiskRule {
    pub name: String,
    pub rule_type: String,
    pub chain: String,
    pub currency: String,
    pub condition: String,
    pub action: String,
    pub risk_level: i32,
    pub priority: i32,
}

impl RiskRule {
    pub fn create(conn: &mut SqliteConnection, new_rule: NewRiskRule) -> WalletResult<RiskRule> {
        diesel::insert_into(risk_rules::table).values(&new_rule).execute(conn)?;
        let rule = risk_rules::table.order(risk_rules::id.desc()).first(conn)?;
        Ok(rule)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, rule_id: i64) -> WalletResult<Option<RiskRule>> {
        let rule = risk_rules::table.find(rule_id).first(conn).optional()?;
        Ok(rule)
    }

    /// Active rules in descending priority
    pub fn list_active(conn: &mut SqliteConnection) -> WalletResult<Vec<RiskRule>> {
        let rules = risk_rules::table
            .filter(risk_rules::status.eq("active"))
            .order(risk_rules::priority.desc())
            .load(conn)?;
        Ok(rules)
    }

    pub fn list_by_type(conn: &mut SqliteConnection, rule_type: &str) -> WalletResult<Vec<RiskRule>> {
        let rules = risk_rules::table
            .filter(risk_rules::rule_type.eq(rule_type))
            .order(risk_rules::priority.desc())
            .load(conn)?;
        Ok(rules)
    }

    pub fn update_condition(
        conn: &mut SqliteConnection,
        rule_id: i64,
        condition: &str,
        action: &str,
        risk_level: i32,
    ) -> WalletResult<()> {
        diesel::update(risk_rules::table.find(rule_id))
            .set((
                risk_rules::condition.eq(condition),
                risk_rules::action.eq(action),
                risk_rules::risk_level.eq(risk_level),
                risk_rules::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn delete(conn: &mut SqliteConnection, rule_id: i64) -> WalletResult<()> {
        diesel::delete(risk_rules::table.find(rule_id)).execute(conn)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = blacklists)]
pub struct Blacklist {
    pub id: i64,
    /// address | user | ip | device
    pub entry_type: String,
    pub value: String,
    pub chain: String,
    pub reason: String,
    pub source: String,
    pub expires_at: Option<NaiveDateTime>,
    pub status: String,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = blacklists)]
pub struct NewBlacklist {
    pub entry_type: String,
    pub value: String,
    pub chain: String,
    pub reason: String,
    pub created_by: i64,
}

impl Blacklist {
    pub fn create(conn: &mut SqliteConnection, entry: NewBlacklist) -> WalletResult<Blacklist> {
        diesel::insert_into(blacklists::table).values(&entry).execute(conn)?;
        let row = blacklists::table.order(blacklists::id.desc()).first(conn)?;
        Ok(row)
    }

    /// Active, unexpired membership check. An entry with an empty chain
    /// matches every chain.
    pub fn contains(
        conn: &mut SqliteConnection,
        entry_type: &str,
        value: &str,
        chain: &str,
    ) -> WalletResult<bool> {
        let rows: Vec<Blacklist> = blacklists::table
            .filter(blacklists::entry_type.eq(entry_type))
            .filter(blacklists::value.eq(value))
            .filter(blacklists::status.eq("active"))
            .load(conn)?;

        let current = now();
        let matched = rows.iter().any(|row| {
            let chain_matches = row.chain.is_empty() || row.chain == chain;
            let unexpired = row.expires_at.map(|at| at > current).unwrap_or(true);
            chain_matches && unexpired
        });
        Ok(matched)
    }

    pub fn delete(conn: &mut SqliteConnection, entry_id: i64) -> WalletResult<()> {
        diesel::delete(blacklists::table.find(entry_id)).execute(conn)?;
        Ok(())
    }

    pub fn list(
        conn: &mut SqliteConnection,
        entry_type: &str,
        page: i64,
        page_size: i64,
    ) -> WalletResult<(Vec<Blacklist>, i64)> {
        let total: i64 = blacklists::table
            .filter(blacklists::entry_type.eq(entry_type))
            .count()
            .get_result(conn)?;

        let rows = blacklists::table
            .filter(blacklists::entry_type.eq(entry_type))
            .order(blacklists::created_at.desc())
            .offset((page.max(1) - 1) * page_size)
            .limit(page_size)
            .load(conn)?;
        Ok((rows, total))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = risk_logs)]
pub struct RiskLog {
    pub id: i64,
    pub user_id: i64,
    /// withdrawal | deposit | login
    pub action: String,
    pub rule_id: Option<i64>,
    pub rule_name: Option<String>,
    pub risk_level: i32,
    /// pass | review | block
    pub result: String,
    pub request_data: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = risk_logs)]
pub struct NewRiskLog {
    pub user_id: i64,
    pub action: String,
    pub rule_id: Option<i64>,
    pub rule_name: Option<String>,
    pub risk_level: i32,
    pub result: String,
    pub request_data: String,
}

impl RiskLog {
    pub fn create(conn: &mut SqliteConnection, log: NewRiskLog) -> WalletResult<()> {
        diesel::insert_into(risk_logs::table).values(&log).execute(conn)?;
        Ok(())
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        limit: i64,
    ) -> WalletResult<Vec<RiskLog>> {
        let rows = risk_logs::table
            .filter(risk_logs::user_id.eq(user_id))
            .order(risk_logs::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_by_result(
        conn: &mut SqliteConnection,
        result: &str,
        limit: i64,
    ) -> WalletResult<Vec<RiskLog>> {
        let rows = risk_logs::table
            .filter(risk_logs::result.eq(result))
            .order(risk_logs::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }
}
