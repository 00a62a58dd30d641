//! Bitcoin adapter over the bitcoind JSON-RPC interface.
//!
//! Address-level balance on a UTXO chain needs an external indexer, so
//! `get_balance` declares the capability unsupported rather than inventing a
//! number. Transaction building is delegated to operator tooling for now.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chain::{ChainAdapter, TransactionInfo, TxStatus};
use crate::crypto::address::validate_address;
use crate::error::{WalletError, WalletResult};

const RPC_TIMEOUT: Duration = Duration::from_secs(15);

pub struct BitcoinAdapter {
    rpc_url: String,
    /// "user:password" for basic auth
    auth: String,
    confirmations: u32,
    client: reqwest::Client,
}

impl BitcoinAdapter {
    pub fn new(rpc_url: &str, auth: &str, confirmations: u32) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            auth: auth.to_string(),
            confirmations,
            client: reqwest::Client::new(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> WalletResult<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "custodia",
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.rpc_url).timeout(RPC_TIMEOUT).json(&body);
        if let Some((user, pass)) = self.auth.split_once(':') {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| WalletError::Transient(format!("malformed rpc response: {e}")))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error")
                .to_string();
            // -5: invalid or unknown tx/address; -27: already in chain
            return match error.get("code").and_then(Value::as_i64) {
                Some(-5) | Some(-27) => Err(WalletError::Terminal(message)),
                _ => Err(WalletError::Transient(message)),
            };
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn name(&self) -> &str {
        "bitcoin"
    }

    async fn get_balance(&self, _address: &str) -> WalletResult<String> {
        Err(WalletError::Unsupported("bitcoin address balance"))
    }

    async fn get_token_balance(&self, _address: &str, _contract: &str) -> WalletResult<String> {
        Err(WalletError::Unsupported("bitcoin token balance"))
    }

    async fn get_transaction(&self, tx_hash: &str) -> WalletResult<Option<TransactionInfo>> {
        let result = match self.rpc("getrawtransaction", json!([tx_hash, true])).await {
            Ok(v) => v,
            Err(WalletError::Terminal(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut info = TransactionInfo::pending(tx_hash);
        info.confirmations = result["confirmations"].as_u64().unwrap_or(0) as u32;
        info.block_hash = result["blockhash"].as_str().unwrap_or_default().to_string();
        info.timestamp = result["blocktime"].as_i64().unwrap_or(0);
        if info.confirmations > 0 {
            info.status = TxStatus::Success;
            let tip = self.get_block_number().await?;
            info.block_number = tip.saturating_sub(info.confirmations as u64 - 1);
        }

        Ok(Some(info))
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        let result = self.rpc("getblockcount", json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| WalletError::Transient("invalid block count".to_string()))
    }

    async fn build_transaction(
        &self,
        _from: &str,
        _to: &str,
        _amount: &str,
        _contract: Option<&str>,
    ) -> WalletResult<String> {
        // UTXO selection lives outside this adapter
        Err(WalletError::Unsupported("bitcoin transaction building"))
    }

    async fn broadcast_transaction(&self, signed_tx: &str) -> WalletResult<String> {
        let result = self.rpc("sendrawtransaction", json!([signed_tx])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::Terminal("broadcast returned no txid".to_string()))
    }

    async fn estimate_fee(&self, _from: &str, _to: &str, _amount: &str) -> WalletResult<String> {
        let result = self.rpc("estimatesmartfee", json!([6])).await?;
        // feerate is BTC/kvB; report sat/kvB as the smallest unit
        let feerate = result["feerate"].as_f64().unwrap_or(0.0);
        Ok(((feerate * 1e8) as u64).to_string())
    }

    fn validate_address(&self, address: &str) -> bool {
        validate_address("bitcoin", address)
    }

    fn required_confirmations(&self) -> u32 {
        self.confirmations
    }
}
