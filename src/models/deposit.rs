//! Deposit-side records: observed credits, address allocations, sweep tasks
//! and scan checkpoints.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{WalletError, WalletResult};
use crate::models::now;
use crate::schema::{deposit_addresses, deposits, scan_progress, sweep_tasks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Confirming,
    Confirmed,
    Credited,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Credited => "credited",
            DepositStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirming" => DepositStatus::Confirming,
            "confirmed" => DepositStatus::Confirmed,
            "credited" => DepositStatus::Credited,
            "failed" => DepositStatus::Failed,
            _ => DepositStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = deposits)]
pub struct Deposit {
    pub id: i64,
    pub uuid: String,
    pub user_id: i64,
    pub chain: String,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub currency: String,
    pub contract_address: Option<String>,
    pub amount: String,
    pub status: String,
    pub confirmations: i32,
    pub block_number: i64,
    pub block_hash: Option<String>,
    pub credited: bool,
    pub credited_at: Option<NaiveDateTime>,
    pub swept: bool,
    pub sweep_tx_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = deposits)]
pub struct NewDeposit {
    pub uuid: String,
    pub user_id: i64,
    pub chain: String,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub currency: String,
    pub contract_address: Option<String>,
    pub amount: String,
    pub status: String,
    pub block_number: i64,
}

impl Deposit {
    pub fn create(conn: &mut SqliteConnection, new_deposit: NewDeposit) -> WalletResult<Deposit> {
        diesel::insert_into(deposits::table)
            .values(&new_deposit)
            .execute(conn)?;

        deposits::table
            .filter(deposits::uuid.eq(&new_deposit.uuid))
            .first(conn)
            .optional()?
            .ok_or(WalletError::NotFound("deposit"))
    }

    pub fn find_by_id(conn: &mut SqliteConnection, deposit_id: i64) -> WalletResult<Option<Deposit>> {
        let row = deposits::table.find(deposit_id).first(conn).optional()?;
        Ok(row)
    }

    pub fn find_by_uuid(conn: &mut SqliteConnection, deposit_uuid: &str) -> WalletResult<Option<Deposit>> {
        let row = deposits::table
            .filter(deposits::uuid.eq(deposit_uuid))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Idempotency anchor: at most one deposit per (chain, tx hash)
    pub fn find_by_chain_tx(
        conn: &mut SqliteConnection,
        chain: &str,
        tx_hash: &str,
    ) -> WalletResult<Option<Deposit>> {
        let row = deposits::table
            .filter(deposits::chain.eq(chain))
            .filter(deposits::tx_hash.eq(tx_hash))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// Deposits still waiting on confirmations for a chain
    pub fn list_awaiting_confirmation(
        conn: &mut SqliteConnection,
        chain: &str,
        limit: i64,
    ) -> WalletResult<Vec<Deposit>> {
        let rows = deposits::table
            .filter(deposits::chain.eq(chain))
            .filter(deposits::status.eq_any([
                DepositStatus::Pending.as_str(),
                DepositStatus::Confirming.as_str(),
            ]))
            .order(deposits::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    /// Confirmed deposits that have not been credited yet
    pub fn list_credit_ready(conn: &mut SqliteConnection, limit: i64) -> WalletResult<Vec<Deposit>> {
        let rows = deposits::table
            .filter(deposits::status.eq(DepositStatus::Confirmed.as_str()))
            .filter(deposits::credited.eq(false))
            .order(deposits::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    /// Credited deposits that still hold funds on the user address
    pub fn list_sweep_ready(
        conn: &mut SqliteConnection,
        chain: &str,
        limit: i64,
    ) -> WalletResult<Vec<Deposit>> {
        let rows = deposits::table
            .filter(deposits::chain.eq(chain))
            .filter(deposits::credited.eq(true))
            .filter(deposits::swept.eq(false))
            .order(deposits::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> WalletResult<(Vec<Deposit>, i64)> {
        let total: i64 = deposits::table
            .filter(deposits::user_id.eq(user_id))
            .count()
            .get_result(conn)?;

        let rows = deposits::table
            .filter(deposits::user_id.eq(user_id))
            .order(deposits::created_at.desc())
            .offset((page.max(1) - 1) * page_size)
            .limit(page_size)
            .load(conn)?;
        Ok((rows, total))
    }

    pub fn update_confirmations(
        conn: &mut SqliteConnection,
        deposit_id: i64,
        confirmations: i32,
        block_number: i64,
        block_hash: Option<&str>,
        status: DepositStatus,
    ) -> WalletResult<()> {
        diesel::update(deposits::table.find(deposit_id))
            .set((
                deposits::confirmations.eq(confirmations),
                deposits::block_number.eq(block_number),
                deposits::block_hash.eq(block_hash),
                deposits::status.eq(status.as_str()),
                deposits::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Compare-and-set `credited = false → true` together with the terminal
    /// status. Returns whether this call won the transition.
    pub fn mark_credited(conn: &mut SqliteConnection, deposit_id: i64) -> WalletResult<bool> {
        let updated = diesel::update(
            deposits::table
                .filter(deposits::id.eq(deposit_id))
                .filter(deposits::credited.eq(false)),
        )
        .set((
            deposits::credited.eq(true),
            deposits::credited_at.eq(now()),
            deposits::status.eq(DepositStatus::Credited.as_str()),
            deposits::updated_at.eq(now()),
        ))
        .execute(conn)?;
        Ok(updated == 1)
    }

    pub fn mark_swept(
        conn: &mut SqliteConnection,
        deposit_id: i64,
        sweep_tx_hash: Option<&str>,
    ) -> WalletResult<()> {
        diesel::update(deposits::table.find(deposit_id))
            .set((
                deposits::swept.eq(true),
                deposits::sweep_tx_hash.eq(sweep_tx_hash),
                deposits::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn status(&self) -> DepositStatus {
        DepositStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = deposit_addresses)]
pub struct DepositAddress {
    pub id: i64,
    pub user_id: i64,
    pub chain: String,
    pub address: String,
    pub label: String,
    pub status: String,
    pub last_used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = deposit_addresses)]
pub struct NewDepositAddress {
    pub user_id: i64,
    pub chain: String,
    pub address: String,
    pub label: String,
}

impl DepositAddress {
    pub fn create(
        conn: &mut SqliteConnection,
        new_address: NewDepositAddress,
    ) -> WalletResult<DepositAddress> {
        diesel::insert_into(deposit_addresses::table)
            .values(&new_address)
            .execute(conn)?;

        deposit_addresses::table
            .filter(deposit_addresses::chain.eq(&new_address.chain))
            .filter(deposit_addresses::address.eq(&new_address.address))
            .first(conn)
            .optional()?
            .ok_or(WalletError::NotFound("deposit address"))
    }

    /// Stable allocation: the first address allocated to (user, chain)
    pub fn find_for_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<Option<DepositAddress>> {
        let row = deposit_addresses::table
            .filter(deposit_addresses::user_id.eq(user_id))
            .filter(deposit_addresses::chain.eq(chain))
            .order(deposit_addresses::id.asc())
            .first(conn)
            .optional()?;
        Ok(row)
    }

    pub fn find_by_chain_address(
        conn: &mut SqliteConnection,
        chain: &str,
        address: &str,
    ) -> WalletResult<Option<DepositAddress>> {
        let row = deposit_addresses::table
            .filter(deposit_addresses::chain.eq(chain))
            .filter(deposit_addresses::address.eq(address))
            .first(conn)
            .optional()?;
        Ok(row)
    }

    /// All allocated addresses on a chain, for the scanner's lookup set
    pub fn list_for_chain(
        conn: &mut SqliteConnection,
        chain: &str,
    ) -> WalletResult<Vec<DepositAddress>> {
        let rows = deposit_addresses::table
            .filter(deposit_addresses::chain.eq(chain))
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_by_user(conn: &mut SqliteConnection, user_id: i64) -> WalletResult<Vec<DepositAddress>> {
        let rows = deposit_addresses::table
            .filter(deposit_addresses::user_id.eq(user_id))
            .order(deposit_addresses::created_at.asc())
            .load(conn)?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Pending,
    Success,
    Failed,
}

impl SweepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepStatus::Pending => "pending",
            SweepStatus::Success => "success",
            SweepStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = sweep_tasks)]
pub struct SweepTask {
    pub id: i64,
    pub chain: String,
    pub from_address: String,
    pub to_address: String,
    pub currency: String,
    pub amount: String,
    pub tx_hash: Option<String>,
    pub status: String,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sweep_tasks)]
pub struct NewSweepTask {
    pub chain: String,
    pub from_address: String,
    pub to_address: String,
    pub currency: String,
    pub amount: String,
}

impl SweepTask {
    pub fn create(conn: &mut SqliteConnection, new_task: NewSweepTask) -> WalletResult<SweepTask> {
        diesel::insert_into(sweep_tasks::table)
            .values(&new_task)
            .execute(conn)?;

        let task = sweep_tasks::table.order(sweep_tasks::id.desc()).first(conn)?;
        Ok(task)
    }

    pub fn list_pending(
        conn: &mut SqliteConnection,
        chain: &str,
        limit: i64,
    ) -> WalletResult<Vec<SweepTask>> {
        let rows = sweep_tasks::table
            .filter(sweep_tasks::chain.eq(chain))
            .filter(sweep_tasks::status.eq(SweepStatus::Pending.as_str()))
            .order(sweep_tasks::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn mark_success(conn: &mut SqliteConnection, task_id: i64, tx_hash: &str) -> WalletResult<()> {
        diesel::update(sweep_tasks::table.find(task_id))
            .set((
                sweep_tasks::status.eq(SweepStatus::Success.as_str()),
                sweep_tasks::tx_hash.eq(tx_hash),
                sweep_tasks::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn mark_failed(conn: &mut SqliteConnection, task_id: i64, error_msg: &str) -> WalletResult<()> {
        diesel::update(sweep_tasks::table.find(task_id))
            .set((
                sweep_tasks::status.eq(SweepStatus::Failed.as_str()),
                sweep_tasks::error_msg.eq(error_msg),
                sweep_tasks::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }
}

/// Last fully scanned block per chain, monotonically non-decreasing
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = scan_progress)]
pub struct ScanProgress {
    pub id: i64,
    pub chain: String,
    pub last_scanned: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = scan_progress)]
struct NewScanProgress<'a> {
    chain: &'a str,
    last_scanned: i64,
}

impl ScanProgress {
    pub fn get(conn: &mut SqliteConnection, chain: &str) -> WalletResult<u64> {
        let row: Option<ScanProgress> = scan_progress::table
            .filter(scan_progress::chain.eq(chain))
            .first(conn)
            .optional()?;
        Ok(row.map(|r| r.last_scanned as u64).unwrap_or(0))
    }

    /// Advance the checkpoint. Regressions are ignored so a slow concurrent
    /// tick can never move the scanner backwards.
    pub fn set(conn: &mut SqliteConnection, chain: &str, block: u64) -> WalletResult<()> {
        let existing: Option<ScanProgress> = scan_progress::table
            .filter(scan_progress::chain.eq(chain))
            .first(conn)
            .optional()?;

        match existing {
            Some(row) if row.last_scanned >= block as i64 => Ok(()),
            Some(row) => {
                diesel::update(scan_progress::table.find(row.id))
                    .set((
                        scan_progress::last_scanned.eq(block as i64),
                        scan_progress::updated_at.eq(now()),
                    ))
                    .execute(conn)?;
                Ok(())
            }
            None => {
                diesel::insert_into(scan_progress::table)
                    .values(&NewScanProgress { chain, last_scanned: block as i64 })
                    .execute(conn)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};

    fn test_db() -> (tempfile::TempDir, crate::db::DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("deposits.db").to_str().unwrap()).unwrap();
        let mut conn = pool.get().unwrap();
        run_migrations(&mut conn).unwrap();
        (dir, pool)
    }

    fn sample_deposit(chain: &str, tx_hash: &str) -> NewDeposit {
        NewDeposit {
            uuid: uuid::Uuid::new_v4().to_string(),
            user_id: 1,
            chain: chain.to_string(),
            tx_hash: tx_hash.to_string(),
            from_address: "0xfrom".to_string(),
            to_address: "0xto".to_string(),
            currency: "ETH".to_string(),
            contract_address: None,
            amount: "1000".to_string(),
            status: DepositStatus::Pending.as_str().to_string(),
            block_number: 100,
        }
    }

    #[test]
    fn test_duplicate_chain_tx_rejected_by_unique_index() {
        let (_dir, pool) = test_db();
        let conn = &mut pool.get().unwrap();

        Deposit::create(conn, sample_deposit("ethereum", "0xabc")).unwrap();
        assert!(Deposit::create(conn, sample_deposit("ethereum", "0xabc")).is_err());
        // the same hash on another chain is a distinct deposit
        Deposit::create(conn, sample_deposit("bsc", "0xabc")).unwrap();
    }

    #[test]
    fn test_mark_credited_cas_wins_once() {
        let (_dir, pool) = test_db();
        let conn = &mut pool.get().unwrap();

        let deposit = Deposit::create(conn, sample_deposit("ethereum", "0xcas")).unwrap();
        assert!(Deposit::mark_credited(conn, deposit.id).unwrap());
        assert!(!Deposit::mark_credited(conn, deposit.id).unwrap());

        let row = Deposit::find_by_id(conn, deposit.id).unwrap().unwrap();
        assert!(row.credited);
        assert_eq!(row.status(), DepositStatus::Credited);
        assert!(row.credited_at.is_some());
    }

    #[test]
    fn test_scan_progress_is_monotonic() {
        let (_dir, pool) = test_db();
        let conn = &mut pool.get().unwrap();

        assert_eq!(ScanProgress::get(conn, "ethereum").unwrap(), 0);
        ScanProgress::set(conn, "ethereum", 100).unwrap();
        assert_eq!(ScanProgress::get(conn, "ethereum").unwrap(), 100);

        // attempts to move backwards are ignored
        ScanProgress::set(conn, "ethereum", 50).unwrap();
        assert_eq!(ScanProgress::get(conn, "ethereum").unwrap(), 100);

        ScanProgress::set(conn, "ethereum", 101).unwrap();
        assert_eq!(ScanProgress::get(conn, "ethereum").unwrap(), 101);
    }

    #[test]
    fn test_deposit_address_stable_allocation() {
        let (_dir, pool) = test_db();
        let conn = &mut pool.get().unwrap();

        DepositAddress::create(
            conn,
            NewDepositAddress {
                user_id: 1,
                chain: "ethereum".to_string(),
                address: "0xaaa".to_string(),
                label: String::new(),
            },
        )
        .unwrap();
        DepositAddress::create(
            conn,
            NewDepositAddress {
                user_id: 1,
                chain: "ethereum".to_string(),
                address: "0xbbb".to_string(),
                label: String::new(),
            },
        )
        .unwrap();

        let allocated = DepositAddress::find_for_user(conn, 1, "ethereum").unwrap().unwrap();
        assert_eq!(allocated.address, "0xaaa");
    }
}
