//! Risk engine: blacklist lookups, declarative rule scan, risk logs.
//!
//! Evaluation order: blacklists first (short-circuit only on block), then
//! active rules in descending priority, then final classification where
//! blocked wins over review wins over pass. Every evaluation appends a
//! RiskLog row.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{with_conn, DbPool};
use crate::error::WalletResult;
use crate::models::balance::parse_amount;
use crate::models::risk::{
    Blacklist, NewBlacklist, NewRiskLog, NewRiskRule, RiskLog, RiskRule, ACTION_BLOCK,
    ACTION_REVIEW, BLACKLIST_ADDRESS, BLACKLIST_DEVICE, BLACKLIST_IP, BLACKLIST_USER,
    RULE_TYPE_AMOUNT_LIMIT,
};

/// Risk levels: 0 = low, 1 = medium, 2 = high
pub const RISK_LOW: i32 = 0;
pub const RISK_MEDIUM: i32 = 1;
pub const RISK_HIGH: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRiskContext {
    pub user_id: i64,
    pub chain: String,
    pub to_address: String,
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositRiskContext {
    pub user_id: i64,
    pub chain: String,
    pub from_address: String,
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRiskContext {
    pub user_id: i64,
    pub ip: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub risk_level: i32,
    pub need_manual_review: bool,
    pub blocked: bool,
    pub reason: String,
    pub matched_rules: Vec<i64>,
}

impl RiskCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    fn outcome(&self) -> &'static str {
        if self.blocked {
            "block"
        } else if self.need_manual_review {
            "review"
        } else {
            "pass"
        }
    }
}

#[derive(Clone)]
pub struct RiskEngine {
    pool: DbPool,
}

impl RiskEngine {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Evaluate a withdrawal request
    pub async fn check_withdrawal(
        &self,
        ctx: &WithdrawalRiskContext,
    ) -> WalletResult<RiskCheckResult> {
        let ctx = ctx.clone();
        let result = with_conn(&self.pool, move |conn| {
            let mut result = RiskCheckResult::pass();

            // Stage 1: blacklists
            if Blacklist::contains(conn, BLACKLIST_ADDRESS, &ctx.to_address, &ctx.chain)? {
                result.passed = false;
                result.blocked = true;
                result.risk_level = RISK_HIGH;
                result.reason = "destination address is blacklisted".to_string();
            } else if Blacklist::contains(conn, BLACKLIST_USER, &ctx.user_id.to_string(), "")? {
                result.passed = false;
                result.blocked = true;
                result.risk_level = RISK_HIGH;
                result.reason = "user is blacklisted".to_string();
            }

            // Stage 2: active rules, unless already blocked
            if !result.blocked {
                let amount = parse_amount(&ctx.amount)?;
                for rule in RiskRule::list_active(conn)? {
                    if !rule.chain.is_empty() && rule.chain != ctx.chain {
                        continue;
                    }
                    if !rule.currency.is_empty() && rule.currency != ctx.currency {
                        continue;
                    }

                    if rule_matches(&rule, amount) {
                        result.matched_rules.push(rule.id);
                        result.risk_level = result.risk_level.max(rule.risk_level);
                        match rule.action.as_str() {
                            ACTION_BLOCK => {
                                result.passed = false;
                                result.blocked = true;
                                result.reason = rule.name.clone();
                                break;
                            }
                            ACTION_REVIEW => result.need_manual_review = true,
                            _ => {}
                        }
                    }
                }
            }

            log_evaluation(conn, ctx.user_id, "withdrawal", &result, &ctx)?;
            Ok(result)
        })
        .await?;

        Ok(result)
    }

    /// Evaluate an observed deposit. A blacklisted source never blocks the
    /// credit, it escalates to manual review.
    pub async fn check_deposit(&self, ctx: &DepositRiskContext) -> WalletResult<RiskCheckResult> {
        let ctx = ctx.clone();
        with_conn(&self.pool, move |conn| {
            let mut result = RiskCheckResult::pass();

            if Blacklist::contains(conn, BLACKLIST_ADDRESS, &ctx.from_address, &ctx.chain)? {
                result.risk_level = RISK_HIGH;
                result.need_manual_review = true;
                result.reason = "source address is blacklisted".to_string();
            }

            log_evaluation(conn, ctx.user_id, "deposit", &result, &ctx)?;
            Ok(result)
        })
        .await
    }

    /// Evaluate a login attempt
    pub async fn check_login(&self, ctx: &LoginRiskContext) -> WalletResult<RiskCheckResult> {
        let ctx = ctx.clone();
        with_conn(&self.pool, move |conn| {
            let mut result = RiskCheckResult::pass();

            if Blacklist::contains(conn, BLACKLIST_IP, &ctx.ip, "")? {
                result.passed = false;
                result.blocked = true;
                result.reason = "ip is blacklisted".to_string();
            } else if !ctx.device.is_empty()
                && Blacklist::contains(conn, BLACKLIST_DEVICE, &ctx.device, "")?
            {
                result.passed = false;
                result.blocked = true;
                result.reason = "device is blacklisted".to_string();
            }

            log_evaluation(conn, ctx.user_id, "login", &result, &ctx)?;
            Ok(result)
        })
        .await
    }

    pub async fn add_to_blacklist(
        &self,
        entry_type: &str,
        value: &str,
        chain: &str,
        reason: &str,
        created_by: i64,
    ) -> WalletResult<Blacklist> {
        let entry = NewBlacklist {
            entry_type: entry_type.to_string(),
            value: value.to_string(),
            chain: chain.to_string(),
            reason: reason.to_string(),
            created_by,
        };
        let row = with_conn(&self.pool, move |conn| Blacklist::create(conn, entry)).await?;
        tracing::info!(entry_type, value, "Added to blacklist");
        Ok(row)
    }

    pub async fn remove_from_blacklist(&self, entry_id: i64) -> WalletResult<()> {
        with_conn(&self.pool, move |conn| Blacklist::delete(conn, entry_id)).await
    }

    pub async fn is_blacklisted(
        &self,
        entry_type: &str,
        value: &str,
        chain: &str,
    ) -> WalletResult<bool> {
        let (entry_type, value, chain) =
            (entry_type.to_string(), value.to_string(), chain.to_string());
        with_conn(&self.pool, move |conn| {
            Blacklist::contains(conn, &entry_type, &value, &chain)
        })
        .await
    }

    pub async fn create_rule(&self, rule: NewRiskRule) -> WalletResult<RiskRule> {
        let row = with_conn(&self.pool, move |conn| RiskRule::create(conn, rule)).await?;
        tracing::info!(rule = %row.name, "Risk rule created");
        Ok(row)
    }

    pub async fn delete_rule(&self, rule_id: i64) -> WalletResult<()> {
        with_conn(&self.pool, move |conn| RiskRule::delete(conn, rule_id)).await
    }

    pub async fn list_risk_logs(&self, user_id: i64, limit: i64) -> WalletResult<Vec<RiskLog>> {
        with_conn(&self.pool, move |conn| RiskLog::list_by_user(conn, user_id, limit)).await
    }
}

/// Evaluate one rule's declarative condition against the amount
fn rule_matches(rule: &RiskRule, amount: Decimal) -> bool {
    let Ok(condition) = serde_json::from_str::<Value>(&rule.condition) else {
        return false;
    };

    match rule.rule_type.as_str() {
        RULE_TYPE_AMOUNT_LIMIT => condition["max_amount"]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .map(|max| amount > max)
            .unwrap_or(false),
        // frequency/kyc conditions need state this engine does not hold yet
        _ => false,
    }
}

fn log_evaluation<C: Serialize>(
    conn: &mut diesel::SqliteConnection,
    user_id: i64,
    action: &str,
    result: &RiskCheckResult,
    ctx: &C,
) -> WalletResult<()> {
    let log = NewRiskLog {
        user_id,
        action: action.to_string(),
        rule_id: result.matched_rules.first().copied(),
        rule_name: None,
        risk_level: result.risk_level,
        result: result.outcome().to_string(),
        request_data: serde_json::to_string(ctx).unwrap_or_default(),
    };
    RiskLog::create(conn, log)
}
