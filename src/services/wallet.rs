//! Wallet surface: wallet records, address generation, balance reads.
//!
//! Address generation delegates key derivation to the key manager and keeps
//! the wallet-facing `addresses` row plus a zero-valued balance row for the
//! chain's default currency.

use std::sync::Arc;

use crate::db::{with_conn, DbPool};
use crate::error::{WalletError, WalletResult};
use crate::models::balance::{Balance, BalanceSnapshot};
use crate::models::wallet::{Address, NewAddress, Wallet, WalletType};
use crate::services::key_manager::KeyManager;

/// Native currency ticker per chain
pub fn default_currency(chain: &str) -> &'static str {
    match chain {
        "bitcoin" => "BTC",
        "ethereum" => "ETH",
        "tron" => "TRX",
        "bsc" => "BNB",
        "polygon" => "MATIC",
        _ => "UNKNOWN",
    }
}

#[derive(Clone)]
pub struct WalletService {
    pool: DbPool,
    key_manager: Arc<KeyManager>,
}

impl WalletService {
    pub fn new(pool: DbPool, key_manager: Arc<KeyManager>) -> Self {
        Self { pool, key_manager }
    }

    pub async fn create_wallet(
        &self,
        user_id: i64,
        name: &str,
        wallet_type: WalletType,
    ) -> WalletResult<Wallet> {
        let name = name.to_string();
        let wallet = with_conn(&self.pool, move |conn| {
            Wallet::create(conn, user_id, &name, wallet_type)
        })
        .await?;

        tracing::info!(user_id, wallet = %wallet.uuid, "Wallet created");
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: i64) -> WalletResult<Wallet> {
        with_conn(&self.pool, move |conn| Wallet::find_by_id(conn, wallet_id))
            .await?
            .ok_or(WalletError::NotFound("wallet"))
    }

    pub async fn list_wallets(&self, user_id: i64) -> WalletResult<Vec<Wallet>> {
        with_conn(&self.pool, move |conn| Wallet::list_by_user(conn, user_id)).await
    }

    /// Derive a new address into a wallet and make sure the default-currency
    /// balance row exists.
    pub async fn generate_address(
        &self,
        wallet_id: i64,
        chain: &str,
        label: &str,
    ) -> WalletResult<Address> {
        let wallet = self.get_wallet(wallet_id).await?;

        let (address, derivation_path) =
            self.key_manager.generate_address(wallet.user_id, chain).await?;

        let new_address = NewAddress {
            uuid: uuid::Uuid::new_v4().to_string(),
            wallet_id,
            user_id: wallet.user_id,
            chain: chain.to_string(),
            address: address.clone(),
            label: label.to_string(),
            derivation_path,
        };
        let currency = default_currency(chain).to_string();
        let chain_owned = chain.to_string();
        let user_id = wallet.user_id;

        let row = with_conn(&self.pool, move |conn| {
            let row = Address::create(conn, new_address)?;
            Balance::ensure(conn, user_id, &chain_owned, &currency)?;
            Ok(row)
        })
        .await?;

        tracing::info!(wallet_id, chain, %address, "Address generated for wallet");
        Ok(row)
    }

    pub async fn list_addresses(&self, user_id: i64, chain: &str) -> WalletResult<Vec<Address>> {
        let chain = chain.to_string();
        with_conn(&self.pool, move |conn| {
            Address::list_by_user_chain(conn, user_id, &chain)
        })
        .await
    }

    /// Balance snapshot; missing rows read as zero
    pub async fn get_balance(
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

    pub async fn list_balances(&self, user_id: i64) -> WalletResult<Vec<Balance>> {
        with_conn(&self.pool, move |conn| Balance::list_by_user(conn, user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};
    use crate::services::audit::AuditSink;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    fn test_service() -> (tempfile::TempDir, WalletService) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("wallets.db").to_str().unwrap()).unwrap();
        let mut conn = pool.get().unwrap();
        run_migrations(&mut conn).unwrap();

        let key_manager = Arc::new(KeyManager::new(
            pool.clone(),
            SecretString::new("wallet-test-secret".to_string()),
            AuditSink::new(pool.clone()),
        ));
        (dir, WalletService::new(pool, key_manager))
    }

    #[tokio::test]
    async fn test_create_wallet_and_generate_address() {
        let (_dir, service) = test_service();

        let wallet = service.create_wallet(1, "main", WalletType::Hot).await.unwrap();
        assert_eq!(wallet.wallet_type(), WalletType::Hot);

        let address = service.generate_address(wallet.id, "ethereum", "deposit").await.unwrap();
        assert!(address.address.starts_with("0x"));
        assert_eq!(address.derivation_path, "m/44'/60'/0'/0/0");
        assert_eq!(address.user_id, 1);

        // a zero balance row exists for the default currency
        let snapshot = service.get_balance(1, "ethereum", "ETH").await.unwrap();
        assert_eq!(snapshot.available, Decimal::ZERO);
        let balances = service.list_balances(1).await.unwrap();
        assert_eq!(balances.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_address_unknown_wallet() {
        let (_dir, service) = test_service();
        let result = service.generate_address(42, "ethereum", "").await;
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_balance_reads_zero() {
        let (_dir, service) = test_service();
        let snapshot = service.get_balance(9, "tron", "TRX").await.unwrap();
        assert_eq!(snapshot.available, Decimal::ZERO);
        assert_eq!(snapshot.frozen, Decimal::ZERO);
    }
}
