//! Withdrawal records and limits.
//!
//! The status machine is strictly monotonic; terminal states are absorbing.
//! Daily totals exclude Rejected, Cancelled and Failed rows.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{WalletError, WalletResult};
use crate::models::balance::parse_amount;
use crate::models::now;
use crate::schema::{withdrawal_limits, withdrawals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    RiskReview,
    ManualReview,
    Approved,
    Processing,
    Broadcast,
    Confirming,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::RiskReview => "risk_review",
            WithdrawalStatus::ManualReview => "manual_review",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Broadcast => "broadcast",
            WithdrawalStatus::Confirming => "confirming",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "risk_review" => WithdrawalStatus::RiskReview,
            "manual_review" => WithdrawalStatus::ManualReview,
            "approved" => WithdrawalStatus::Approved,
            "processing" => WithdrawalStatus::Processing,
            "broadcast" => WithdrawalStatus::Broadcast,
            "confirming" => WithdrawalStatus::Confirming,
            "completed" => WithdrawalStatus::Completed,
            "failed" => WithdrawalStatus::Failed,
            "rejected" => WithdrawalStatus::Rejected,
            "cancelled" => WithdrawalStatus::Cancelled,
            _ => WithdrawalStatus::Pending,
        }
    }

    /// Absorbing states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed
                | WithdrawalStatus::Failed
                | WithdrawalStatus::Rejected
                | WithdrawalStatus::Cancelled
        )
    }

    /// Rows excluded from rolling daily totals
    pub fn excluded_from_daily_total(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Rejected | WithdrawalStatus::Cancelled | WithdrawalStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = withdrawals)]
pub struct Withdrawal {
    pub id: i64,
    pub uuid: String,
    pub user_id: i64,
    pub chain: String,
    pub tx_hash: Option<String>,
    pub from_address: Option<String>,
    pub to_address: String,
    pub currency: String,
    pub contract_address: Option<String>,
    pub amount: String,
    pub fee: Option<String>,
    pub status: String,
    pub risk_level: i32,
    pub manual_review: bool,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_note: Option<String>,
    pub confirmations: i32,
    pub block_number: i64,
    pub memo: Option<String>,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = withdrawals)]
pub struct NewWithdrawal {
    pub uuid: String,
    pub user_id: i64,
    pub chain: String,
    pub to_address: String,
    pub currency: String,
    pub contract_address: Option<String>,
    pub amount: String,
    pub fee: Option<String>,
    pub status: String,
    pub risk_level: i32,
    pub manual_review: bool,
    pub memo: Option<String>,
}

impl Withdrawal {
    pub fn create(conn: &mut SqliteConnection, new_withdrawal: NewWithdrawal) -> WalletResult<Withdrawal> {
        diesel::insert_into(withdrawals::table)
            .values(&new_withdrawal)
            .execute(conn)?;

        withdrawals::table
            .filter(withdrawals::uuid.eq(&new_withdrawal.uuid))
            .first(conn)
            .optional()?
            .ok_or(WalletError::NotFound("withdrawal"))
    }

    pub fn find_by_id(conn: &mut SqliteConnection, withdrawal_id: i64) -> WalletResult<Option<Withdrawal>> {
        let row = withdrawals::table.find(withdrawal_id).first(conn).optional()?;
        Ok(row)
    }

    pub fn find_by_uuid(conn: &mut SqliteConnection, withdrawal_uuid: &str) -> WalletResult<Option<Withdrawal>> {
        let row = withdrawals::table
            .filter(withdrawals::uuid.eq(withdrawal_uuid))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn list_by_status(
        conn: &mut SqliteConnection,
        status: WithdrawalStatus,
        limit: i64,
    ) -> WalletResult<Vec<Withdrawal>> {
        let rows = withdrawals::table
            .filter(withdrawals::status.eq(status.as_str()))
            .order(withdrawals::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    /// Broadcast or confirming rows for a chain, for the finalizer
    pub fn list_awaiting_confirmation(
        conn: &mut SqliteConnection,
        chain: &str,
        limit: i64,
    ) -> WalletResult<Vec<Withdrawal>> {
        let rows = withdrawals::table
            .filter(withdrawals::chain.eq(chain))
            .filter(withdrawals::status.eq_any([
                WithdrawalStatus::Broadcast.as_str(),
                WithdrawalStatus::Confirming.as_str(),
            ]))
            .order(withdrawals::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> WalletResult<(Vec<Withdrawal>, i64)> {
        let total: i64 = withdrawals::table
            .filter(withdrawals::user_id.eq(user_id))
            .count()
            .get_result(conn)?;

        let rows = withdrawals::table
            .filter(withdrawals::user_id.eq(user_id))
            .order(withdrawals::created_at.desc())
            .offset((page.max(1) - 1) * page_size)
            .limit(page_size)
            .load(conn)?;
        Ok((rows, total))
    }

    /// Sum of today's withdrawals for (user, chain, currency), excluding
    /// rejected/cancelled/failed rows. Amounts are TEXT so the sum runs in
    /// decimal space, not SQL.
    pub fn daily_total(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Decimal> {
        let midnight = chrono::Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("valid midnight");

        let rows: Vec<Withdrawal> = withdrawals::table
            .filter(withdrawals::user_id.eq(user_id))
            .filter(withdrawals::chain.eq(chain))
            .filter(withdrawals::currency.eq(currency))
            .filter(withdrawals::created_at.ge(midnight))
            .load(conn)?;

        let mut total = Decimal::ZERO;
        for row in rows {
            if row.status().excluded_from_daily_total() {
                continue;
            }
            total += parse_amount(&row.amount)?;
        }
        Ok(total)
    }

    pub fn set_status(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        status: WithdrawalStatus,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::status.eq(status.as_str()),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn set_review(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        status: WithdrawalStatus,
        reviewer_id: i64,
        note: &str,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::status.eq(status.as_str()),
                withdrawals::reviewed_by.eq(reviewer_id),
                withdrawals::reviewed_at.eq(now()),
                withdrawals::review_note.eq(note),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn mark_broadcast(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        tx_hash: &str,
        from_address: &str,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::status.eq(WithdrawalStatus::Broadcast.as_str()),
                withdrawals::tx_hash.eq(tx_hash),
                withdrawals::from_address.eq(from_address),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn mark_failed(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        error_msg: &str,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::status.eq(WithdrawalStatus::Failed.as_str()),
                withdrawals::error_msg.eq(error_msg),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn update_confirmation(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        confirmations: i32,
        block_number: i64,
        status: WithdrawalStatus,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::confirmations.eq(confirmations),
                withdrawals::block_number.eq(block_number),
                withdrawals::status.eq(status.as_str()),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn mark_completed(
        conn: &mut SqliteConnection,
        withdrawal_id: i64,
        confirmations: i32,
        block_number: i64,
    ) -> WalletResult<()> {
        diesel::update(withdrawals::table.find(withdrawal_id))
            .set((
                withdrawals::status.eq(WithdrawalStatus::Completed.as_str()),
                withdrawals::confirmations.eq(confirmations),
                withdrawals::block_number.eq(block_number),
                withdrawals::completed_at.eq(now()),
                withdrawals::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn status(&self) -> WithdrawalStatus {
        WithdrawalStatus::parse(&self.status)
    }
}

/// Per-user (user_id > 0) or global (user_id = 0) limits
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = withdrawal_limits)]
pub struct WithdrawalLimit {
    pub id: i64,
    pub user_id: i64,
    pub chain: String,
    pub currency: String,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub daily_limit: Option<String>,
    pub monthly_limit: Option<String>,
    pub require_review: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = withdrawal_limits)]
pub struct NewWithdrawalLimit {
    pub user_id: i64,
    pub chain: String,
    pub currency: String,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub daily_limit: Option<String>,
    pub monthly_limit: Option<String>,
    pub require_review: Option<String>,
}

impl WithdrawalLimit {
    /// The limit applying to a user: their own row if present, else the
    /// global row (user_id = 0)
    pub fn effective(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Option<WithdrawalLimit>> {
        if let Some(row) = Self::find(conn, user_id, chain, currency)? {
            return Ok(Some(row));
        }
        Self::find(conn, 0, chain, currency)
    }

    pub fn find(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Option<WithdrawalLimit>> {
        let row = withdrawal_limits::table
            .filter(withdrawal_limits::user_id.eq(user_id))
            .filter(withdrawal_limits::chain.eq(chain))
            .filter(withdrawal_limits::currency.eq(currency))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn upsert(conn: &mut SqliteConnection, new_limit: NewWithdrawalLimit) -> WalletResult<()> {
        match Self::find(conn, new_limit.user_id, &new_limit.chain, &new_limit.currency)? {
            Some(existing) => {
                diesel::update(withdrawal_limits::table.find(existing.id))
                    .set((
                        withdrawal_limits::min_amount.eq(&new_limit.min_amount),
                        withdrawal_limits::max_amount.eq(&new_limit.max_amount),
                        withdrawal_limits::daily_limit.eq(&new_limit.daily_limit),
                        withdrawal_limits::monthly_limit.eq(&new_limit.monthly_limit),
                        withdrawal_limits::require_review.eq(&new_limit.require_review),
                        withdrawal_limits::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
            }
            None => {
                diesel::insert_into(withdrawal_limits::table)
                    .values(&new_limit)
                    .execute(conn)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::RiskReview,
            WithdrawalStatus::ManualReview,
            WithdrawalStatus::Approved,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Broadcast,
            WithdrawalStatus::Confirming,
            WithdrawalStatus::Completed,
            WithdrawalStatus::Failed,
            WithdrawalStatus::Rejected,
            WithdrawalStatus::Cancelled,
        ] {
            assert_eq!(WithdrawalStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(WithdrawalStatus::Completed.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());
        assert!(WithdrawalStatus::Rejected.is_terminal());
        assert!(WithdrawalStatus::Cancelled.is_terminal());
        assert!(!WithdrawalStatus::Broadcast.is_terminal());
        assert!(!WithdrawalStatus::Approved.is_terminal());
    }

    #[test]
    fn test_daily_total_exclusions() {
        assert!(WithdrawalStatus::Rejected.excluded_from_daily_total());
        assert!(WithdrawalStatus::Cancelled.excluded_from_daily_total());
        assert!(WithdrawalStatus::Failed.excluded_from_daily_total());
        assert!(!WithdrawalStatus::Completed.excluded_from_daily_total());
        assert!(!WithdrawalStatus::Pending.excluded_from_daily_total());
    }
}
