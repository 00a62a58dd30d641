//! The balance ledger.
//!
//! One row per (user, chain, currency) holding three non-negative decimals:
//! available (spendable), frozen (backing in-flight withdrawals) and pending
//! (advisory). Every mutation is a guarded single-row transaction: either
//! the precondition holds and the row updates, or the operation fails with
//! `InsufficientBalance` and the row is untouched.
//!
//! SQLite's single-writer transactions serialize concurrent writers to the
//! same row; `immediate_transaction` takes the write lock up front so the
//! read inside the guard cannot go stale.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{WalletError, WalletResult};
use crate::models::now;
use crate::schema::balances;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = balances)]
pub struct Balance {
    pub id: i64,
    pub user_id: i64,
    pub chain: String,
    pub currency: String,
    pub available: String,
    pub frozen: String,
    pub pending: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = balances)]
struct NewBalance<'a> {
    user_id: i64,
    chain: &'a str,
    currency: &'a str,
}

/// Snapshot of the three components as decimals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub available: Decimal,
    pub frozen: Decimal,
    pub pending: Decimal,
}

impl BalanceSnapshot {
    pub fn zero() -> Self {
        Self {
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
            pending: Decimal::ZERO,
        }
    }
}

/// Parse a stored or caller-supplied decimal amount
pub fn parse_amount(s: &str) -> WalletResult<Decimal> {
    s.parse::<Decimal>()
        .map_err(|_| WalletError::InvalidArgument(format!("invalid decimal amount: {s}")))
}

fn positive_amount(amount: &str) -> WalletResult<Decimal> {
    let amount = parse_amount(amount)?;
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidArgument(
            "amount must be positive".to_string(),
        ));
    }
    Ok(amount)
}

impl Balance {
    /// Read the row, or a zero snapshot if it does not exist
    pub fn read(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<BalanceSnapshot> {
        match Self::find(conn, user_id, chain, currency)? {
            Some(row) => Ok(BalanceSnapshot {
                available: parse_amount(&row.available)?,
                frozen: parse_amount(&row.frozen)?,
                pending: parse_amount(&row.pending)?,
            }),
            None => Ok(BalanceSnapshot::zero()),
        }
    }

    pub fn find(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Option<Balance>> {
        let row = balances::table
            .filter(balances::user_id.eq(user_id))
            .filter(balances::chain.eq(chain))
            .filter(balances::currency.eq(currency))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Ensure the row exists (zero-valued), returning it
    pub fn ensure(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Balance> {
        if let Some(row) = Self::find(conn, user_id, chain, currency)? {
            return Ok(row);
        }
        diesel::insert_into(balances::table)
            .values(&NewBalance { user_id, chain, currency })
            .execute(conn)?;
        Self::find(conn, user_id, chain, currency)?
            .ok_or(WalletError::NotFound("balance"))
    }

    /// `available += amount`
    pub fn increment(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        conn.immediate_transaction(|conn| {
            Self::increment_within(conn, user_id, chain, currency, amount)
        })
    }

    /// Increment without opening a transaction. The caller must already hold
    /// one; used where a credit and its source row commit together.
    pub(crate) fn increment_within(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let amount = positive_amount(amount)?;
        let row = Self::ensure(conn, user_id, chain, currency)?;
        let available = parse_amount(&row.available)? + amount;
        Self::write(conn, row.id, Some(available), None)
    }

    /// `available -= amount`, guarded by `available >= amount`
    pub fn decrement(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let amount = positive_amount(amount)?;
        conn.immediate_transaction(|conn| {
            let row = Self::find(conn, user_id, chain, currency)?
                .ok_or(WalletError::InsufficientBalance)?;
            let available = parse_amount(&row.available)?;
            if available < amount {
                return Err(WalletError::InsufficientBalance);
            }
            Self::write(conn, row.id, Some(available - amount), None)
        })
    }

    /// Move `amount` from available to frozen, atomically
    pub fn freeze(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let amount = positive_amount(amount)?;
        conn.immediate_transaction(|conn| {
            let row = Self::find(conn, user_id, chain, currency)?
                .ok_or(WalletError::InsufficientBalance)?;
            let available = parse_amount(&row.available)?;
            if available < amount {
                return Err(WalletError::InsufficientBalance);
            }
            let frozen = parse_amount(&row.frozen)? + amount;
            Self::write(conn, row.id, Some(available - amount), Some(frozen))
        })
    }

    /// Move `amount` back from frozen to available, atomically
    pub fn unfreeze(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        conn.immediate_transaction(|conn| {
            Self::unfreeze_within(conn, user_id, chain, currency, amount)
        })
    }

    /// Unfreeze inside a caller-held transaction
    pub(crate) fn unfreeze_within(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let amount = positive_amount(amount)?;
        let row = Self::find(conn, user_id, chain, currency)?
            .ok_or(WalletError::InsufficientBalance)?;
        let frozen = parse_amount(&row.frozen)?;
        if frozen < amount {
            return Err(WalletError::InsufficientBalance);
        }
        let available = parse_amount(&row.available)? + amount;
        Self::write(conn, row.id, Some(available), Some(frozen - amount))
    }

    /// Remove `amount` from frozen (a completed withdrawal leaves the ledger)
    pub fn debit_frozen(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        conn.immediate_transaction(|conn| {
            Self::debit_frozen_within(conn, user_id, chain, currency, amount)
        })
    }

    /// Debit frozen inside a caller-held transaction
    pub(crate) fn debit_frozen_within(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let amount = positive_amount(amount)?;
        let row = Self::find(conn, user_id, chain, currency)?
            .ok_or(WalletError::InsufficientBalance)?;
        let frozen = parse_amount(&row.frozen)?;
        if frozen < amount {
            return Err(WalletError::InsufficientBalance);
        }
        Self::write(conn, row.id, None, Some(frozen - amount))
    }

    fn write(
        conn: &mut SqliteConnection,
        row_id: i64,
        available: Option<Decimal>,
        frozen: Option<Decimal>,
    ) -> WalletResult<()> {
        match (available, frozen) {
            (Some(a), Some(f)) => {
                diesel::update(balances::table.find(row_id))
                    .set((
                        balances::available.eq(a.to_string()),
                        balances::frozen.eq(f.to_string()),
                        balances::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
            }
            (Some(a), None) => {
                diesel::update(balances::table.find(row_id))
                    .set((
                        balances::available.eq(a.to_string()),
                        balances::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
            }
            (None, Some(f)) => {
                diesel::update(balances::table.find(row_id))
                    .set((
                        balances::frozen.eq(f.to_string()),
                        balances::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    pub fn list_by_user(conn: &mut SqliteConnection, user_id: i64) -> WalletResult<Vec<Balance>> {
        let rows = balances::table
            .filter(balances::user_id.eq(user_id))
            .order((balances::chain.asc(), balances::currency.asc()))
            .load(conn)?;
        Ok(rows)
    }
}
