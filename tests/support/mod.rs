//! Shared test infrastructure: a scriptable mock chain adapter and a fully
//! wired service fixture over a scratch database.

// not every test binary touches every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;

use custodia::chain::{
    Block, BlockSource, ChainAdapter, EventLog, LogSource, TransactionInfo, TxStatus,
};
use custodia::db::{create_pool, run_migrations, DbPool};
use custodia::error::{WalletError, WalletResult};
use custodia::services::{
    AuditSink, DepositPipeline, EventBus, KeyManager, Ledger, Notifier, RiskEngine,
    WithdrawalPipeline,
};

/// Scriptable in-memory chain.
///
/// Tests populate blocks, transactions and logs; the adapter serves them
/// back with confirmations computed from the current tip.
#[derive(Default)]
pub struct MockChainState {
    pub blocks: HashMap<u64, Vec<String>>,
    pub transactions: HashMap<String, TransactionInfo>,
    pub logs: HashMap<u64, Vec<EventLog>>,
    pub broadcasts: Vec<String>,
    /// Heights whose block fetch fails (simulated node trouble)
    pub failing_blocks: Vec<u64>,
    broadcast_seq: u64,
}

pub struct MockChainAdapter {
    name: String,
    confirmations: u32,
    tip: AtomicU64,
    state: Mutex<MockChainState>,
}

impl MockChainAdapter {
    pub fn new(name: &str, confirmations: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            confirmations,
            tip: AtomicU64::new(0),
            state: Mutex::new(MockChainState::default()),
        })
    }

    pub fn set_tip(&self, height: u64) {
        self.tip.store(height, Ordering::SeqCst);
    }

    pub fn tip(&self) -> u64 {
        self.tip.load(Ordering::SeqCst)
    }

    /// Install a block containing the given tx hashes
    pub fn add_block(&self, height: u64, tx_hashes: Vec<&str>) {
        let mut state = self.state.lock().unwrap();
        state
            .blocks
            .insert(height, tx_hashes.into_iter().map(String::from).collect());
        if self.tip() < height {
            self.set_tip(height);
        }
    }

    /// Install a native transfer transaction
    pub fn add_transfer(&self, tx_hash: &str, from: &str, to: &str, amount: &str, block: u64) {
        let mut info = TransactionInfo::pending(tx_hash);
        info.from = from.to_string();
        info.to = to.to_string();
        info.amount = amount.to_string();
        info.block_number = block;
        info.status = TxStatus::Success;
        self.state.lock().unwrap().transactions.insert(tx_hash.to_string(), info);
    }

    /// Override the on-chain status of a known transaction
    pub fn set_tx_status(&self, tx_hash: &str, status: TxStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.transactions.get_mut(tx_hash) {
            info.status = status;
        }
    }

    pub fn fail_block(&self, height: u64) {
        self.state.lock().unwrap().failing_blocks.push(height);
    }

    pub fn clear_block_failures(&self) {
        self.state.lock().unwrap().failing_blocks.clear();
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// The hash the next broadcast will be recorded under
    pub fn last_broadcast_hash(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        (state.broadcast_seq > 0).then(|| format!("0xbroadcast{}", state.broadcast_seq - 1))
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balance(&self, _address: &str) -> WalletResult<String> {
        Ok("0".to_string())
    }

    async fn get_token_balance(&self, _address: &str, _contract: &str) -> WalletResult<String> {
        Ok("0".to_string())
    }

    async fn get_transaction(&self, tx_hash: &str) -> WalletResult<Option<TransactionInfo>> {
        let state = self.state.lock().unwrap();
        let Some(info) = state.transactions.get(tx_hash) else {
            return Ok(None);
        };
        let mut info = info.clone();
        if info.block_number > 0 {
            info.confirmations = (self.tip().saturating_sub(info.block_number) + 1) as u32;
        }
        Ok(Some(info))
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        Ok(self.tip())
    }

    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        contract: Option<&str>,
    ) -> WalletResult<String> {
        Ok(serde_json::json!({
            "from": from,
            "to": to,
            "amount": amount,
            "contract": contract,
        })
        .to_string())
    }

    async fn broadcast_transaction(&self, signed_tx: &str) -> WalletResult<String> {
        let mut state = self.state.lock().unwrap();
        let hash = format!("0xbroadcast{}", state.broadcast_seq);
        state.broadcast_seq += 1;
        state.broadcasts.push(signed_tx.to_string());
        Ok(hash)
    }

    async fn estimate_fee(&self, _from: &str, _to: &str, _amount: &str) -> WalletResult<String> {
        Ok("21000000000000".to_string())
    }

    fn validate_address(&self, address: &str) -> bool {
        !address.is_empty()
    }

    fn required_confirmations(&self) -> u32 {
        self.confirmations
    }

    fn block_source(&self) -> Option<&dyn BlockSource> {
        Some(self)
    }

    fn log_source(&self) -> Option<&dyn LogSource> {
        Some(self)
    }
}

#[async_trait]
impl BlockSource for MockChainAdapter {
    async fn get_block(&self, height: u64) -> WalletResult<Block> {
        let state = self.state.lock().unwrap();
        if state.failing_blocks.contains(&height) {
            return Err(WalletError::Transient(format!("block {height} unavailable")));
        }
        let transactions = state.blocks.get(&height).cloned().unwrap_or_default();
        Ok(Block {
            number: height,
            hash: format!("0xblock{height}"),
            parent_hash: format!("0xblock{}", height.saturating_sub(1)),
            timestamp: 1_700_000_000 + height as i64,
            transactions,
        })
    }
}

#[async_trait]
impl LogSource for MockChainAdapter {
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        _addresses: &[String],
    ) -> WalletResult<Vec<EventLog>> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for height in from_block..=to_block {
            if let Some(entries) = state.logs.get(&height) {
                out.extend(entries.iter().cloned());
            }
        }
        Ok(out)
    }
}

/// Everything a pipeline test needs, wired like the worker binary
pub struct TestHarness {
    pub pool: DbPool,
    pub adapter: Arc<MockChainAdapter>,
    pub key_manager: Arc<KeyManager>,
    pub ledger: Ledger,
    pub risk: RiskEngine,
    pub deposits: Arc<DepositPipeline>,
    pub withdrawals: Arc<WithdrawalPipeline>,
    pub events: EventBus,
    pub hot_wallet: String,
    _dir: tempfile::TempDir,
}

pub const CHAIN: &str = "ethereum";
pub const CONFIRMATIONS: u32 = 12;

impl TestHarness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("harness.db").to_str().unwrap()).unwrap();
        {
            let mut conn = pool.get().unwrap();
            run_migrations(&mut conn).unwrap();
        }

        let adapter = MockChainAdapter::new(CHAIN, CONFIRMATIONS);
        let mut adapters: HashMap<String, Arc<dyn ChainAdapter>> = HashMap::new();
        adapters.insert(CHAIN.to_string(), adapter.clone());

        let audit = AuditSink::new(pool.clone());
        let events = EventBus::new();
        let notifier = Notifier::new(pool.clone());
        let ledger = Ledger::new(pool.clone());
        let risk = RiskEngine::new(pool.clone());
        let key_manager = Arc::new(KeyManager::new(
            pool.clone(),
            SecretString::new("harness-kek-secret".to_string()),
            audit.clone(),
        ));

        // platform hot wallet key lives under the reserved user id 0
        let (hot_wallet, _) = key_manager.generate_address(0, CHAIN).await.unwrap();
        let hot_wallets: HashMap<String, String> =
            [(CHAIN.to_string(), hot_wallet.clone())].into();

        let deposits = Arc::new(DepositPipeline::new(
            pool.clone(),
            adapters.clone(),
            key_manager.clone(),
            audit.clone(),
            events.clone(),
            notifier.clone(),
            200,
            hot_wallets.clone(),
        ));
        let withdrawals = Arc::new(WithdrawalPipeline::new(
            pool.clone(),
            adapters,
            ledger.clone(),
            key_manager.clone(),
            risk.clone(),
            audit,
            events.clone(),
            notifier,
            hot_wallets,
        ));

        Self {
            pool,
            adapter,
            key_manager,
            ledger,
            risk,
            deposits,
            withdrawals,
            events,
            hot_wallet,
            _dir: dir,
        }
    }

    /// Run the confirmation-driver work for one tick
    pub async fn confirmation_tick(&self) {
        self.deposits.check_confirmations(CHAIN).await.unwrap();
        self.deposits.process_credits().await.unwrap();
        self.withdrawals.check_confirmations(CHAIN).await.unwrap();
    }
}
