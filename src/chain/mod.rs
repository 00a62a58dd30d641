//! Abstract chain adapters.
//!
//! Every supported blockchain implements [`ChainAdapter`]. Adapters that can
//! enumerate whole blocks or query event logs additionally expose the
//! [`BlockSource`] / [`LogSource`] capabilities; the deposit scanner probes
//! for them and degrades to polling known transaction hashes otherwise.
//!
//! Amounts cross this boundary as decimal strings in the chain's smallest
//! unit. Wire failures are normalized to `WalletError::Transient` (retry at
//! the next tick) or `WalletError::Terminal` (stop the current operation).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;

pub mod bitcoin;
pub mod ethereum;
pub mod tron;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// On-chain transaction execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

/// Canonical transaction shape returned by every adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    /// Decimal string in the chain's smallest unit
    pub amount: String,
    pub fee: String,
    pub gas_price: String,
    pub gas_used: u64,
    pub nonce: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub confirmations: u32,
    pub status: TxStatus,
    pub timestamp: i64,
}

impl TransactionInfo {
    pub fn pending(tx_hash: &str) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            from: String::new(),
            to: String::new(),
            amount: "0".to_string(),
            fee: "0".to_string(),
            gas_price: "0".to_string(),
            gas_used: 0,
            nonce: 0,
            block_number: 0,
            block_hash: String::new(),
            confirmations: 0,
            status: TxStatus::Pending,
            timestamp: 0,
        }
    }
}

/// Block header plus the hashes of its transactions
#[derive(Debug, Clone)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    pub transactions: Vec<String>,
}

/// A contract event record
#[derive(Debug, Clone)]
pub struct EventLog {
    /// Emitting contract
    pub address: String,
    pub topics: Vec<String>,
    /// ABI-encoded payload, 0x-prefixed hex
    pub data: String,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Uniform read/build/broadcast surface over one blockchain
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Native-currency balance of an address, smallest unit
    async fn get_balance(&self, address: &str) -> WalletResult<String>;

    /// Token balance of an address for a contract, smallest unit
    async fn get_token_balance(&self, address: &str, contract: &str) -> WalletResult<String>;

    /// Look up a transaction; `None` when the chain does not know the hash
    async fn get_transaction(&self, tx_hash: &str) -> WalletResult<Option<TransactionInfo>>;

    /// Latest block height
    async fn get_block_number(&self) -> WalletResult<u64>;

    /// Build an unsigned transaction payload for the signer
    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        contract: Option<&str>,
    ) -> WalletResult<String>;

    /// Submit a signed transaction, returning its hash
    async fn broadcast_transaction(&self, signed_tx: &str) -> WalletResult<String>;

    /// Estimated fee for a simple transfer, smallest unit
    async fn estimate_fee(&self, from: &str, to: &str, amount: &str) -> WalletResult<String>;

    fn validate_address(&self, address: &str) -> bool;

    fn required_confirmations(&self) -> u32;

    /// Block enumeration capability, when the node supports it
    fn block_source(&self) -> Option<&dyn BlockSource> {
        None
    }

    /// Event-log query capability, when the node supports it
    fn log_source(&self) -> Option<&dyn LogSource> {
        None
    }
}

/// Extended capability: fetch a block with its transaction hashes
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_block(&self, height: u64) -> WalletResult<Block>;
}

/// Extended capability: query event logs over a block range
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[String],
    ) -> WalletResult<Vec<EventLog>>;
}
