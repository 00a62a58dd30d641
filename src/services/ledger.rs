//! Thread-safe async facade over the balance ledger.
//!
//! All six operations delegate to the guarded single-row transactions in
//! [`crate::models::balance`]; this layer only lifts them off the async
//! runtime and gives the pipelines one injectable handle.

use crate::db::{with_conn, DbPool};
use crate::error::WalletResult;
use crate::models::balance::{Balance, BalanceSnapshot};

#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
}

impl Ledger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn increment(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let (chain, currency, amount) = own3(chain, currency, amount);
        with_conn(&self.pool, move |conn| {
            Balance::increment(conn, user_id, &chain, &currency, &amount)
        })
        .await
    }

    pub async fn decrement(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let (chain, currency, amount) = own3(chain, currency, amount);
        with_conn(&self.pool, move |conn| {
            Balance::decrement(conn, user_id, &chain, &currency, &amount)
        })
        .await
    }

    pub async fn freeze(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let (chain, currency, amount) = own3(chain, currency, amount);
        with_conn(&self.pool, move |conn| {
            Balance::freeze(conn, user_id, &chain, &currency, &amount)
        })
        .await
    }

    pub async fn unfreeze(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let (chain, currency, amount) = own3(chain, currency, amount);
        with_conn(&self.pool, move |conn| {
            Balance::unfreeze(conn, user_id, &chain, &currency, &amount)
        })
        .await
    }

    pub async fn debit_frozen(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
        amount: &str,
    ) -> WalletResult<()> {
        let (chain, currency, amount) = own3(chain, currency, amount);
        with_conn(&self.pool, move |conn| {
            Balance::debit_frozen(conn, user_id, &chain, &currency, &amount)
        })
        .await
    }

    pub async fn read(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<BalanceSnapshot> {
        let chain = chain.to_string();
        let currency = currency.to_string();
        with_conn(&self.pool, move |conn| {
            Balance::read(conn, user_id, &chain, &currency)
        })
        .await
    }
}

fn own3(a: &str, b: &str, c: &str) -> (String, String, String) {
    (a.to_string(), b.to_string(), c.to_string())
}
