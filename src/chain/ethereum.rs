//! EVM-family JSON-RPC adapter.
//!
//! One implementation serves ethereum, bsc and polygon; only the name,
//! chain id and confirmation threshold differ. Exposes both extended
//! scanner capabilities (`eth_getBlockByNumber`, `eth_getLogs`).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chain::{Block, BlockSource, ChainAdapter, EventLog, LogSource, TransactionInfo, TxStatus};
use crate::crypto::address::validate_address;
use crate::error::{WalletError, WalletResult};

/// Per-call deadline for read RPCs
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Broadcasts get a longer deadline
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(30);

/// Intrinsic gas of a plain value transfer
const TRANSFER_GAS: u64 = 21_000;

/// Default gas limit for an ERC-20 transfer
const TOKEN_TRANSFER_GAS: u64 = 100_000;

pub struct EthereumAdapter {
    name: String,
    rpc_url: String,
    chain_id: i64,
    confirmations: u32,
    client: reqwest::Client,
}

impl EthereumAdapter {
    pub fn new(rpc_url: &str, chain_id: i64, confirmations: u32) -> Self {
        Self::with_name(rpc_url, chain_id, confirmations, "ethereum")
    }

    /// EVM-compatible chain under a different name (bsc, polygon)
    pub fn with_name(rpc_url: &str, chain_id: i64, confirmations: u32, name: &str) -> Self {
        Self {
            name: name.to_string(),
            rpc_url: rpc_url.to_string(),
            chain_id,
            confirmations,
            client: reqwest::Client::new(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> WalletResult<Value> {
        self.rpc_with_timeout(method, params, RPC_TIMEOUT).await
    }

    async fn rpc_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> WalletResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;

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
            return Err(classify_rpc_error(message));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> WalletResult<Option<Value>> {
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        Ok(if receipt.is_null() { None } else { Some(receipt) })
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balance(&self, address: &str) -> WalletResult<String> {
        let result = self.rpc("eth_getBalance", json!([address, "latest"])).await?;
        Ok(hex_quantity_to_decimal(&result)?)
    }

    async fn get_token_balance(&self, address: &str, contract: &str) -> WalletResult<String> {
        // ERC-20 balanceOf(address)
        let data = format!("0x70a08231{:0>64}", address.trim_start_matches("0x"));
        let result = self
            .rpc("eth_call", json!([{ "to": contract, "data": data }, "latest"]))
            .await?;
        Ok(hex_quantity_to_decimal(&result)?)
    }

    async fn get_transaction(&self, tx_hash: &str) -> WalletResult<Option<TransactionInfo>> {
        let tx = self.rpc("eth_getTransactionByHash", json!([tx_hash])).await?;
        if tx.is_null() {
            return Ok(None);
        }

        let mut info = TransactionInfo::pending(tx_hash);
        info.from = str_field(&tx, "from");
        info.to = str_field(&tx, "to");
        info.amount = hex_quantity_to_decimal(&tx["value"]).unwrap_or_else(|_| "0".to_string());
        info.gas_price = hex_quantity_to_decimal(&tx["gasPrice"]).unwrap_or_else(|_| "0".to_string());
        info.nonce = hex_to_u64(&tx["nonce"]).unwrap_or(0);

        if tx["blockNumber"].is_null() {
            return Ok(Some(info));
        }

        let Some(receipt) = self.transaction_receipt(tx_hash).await? else {
            return Ok(Some(info));
        };

        info.block_number = hex_to_u64(&receipt["blockNumber"]).unwrap_or(0);
        info.block_hash = str_field(&receipt, "blockHash");
        info.gas_used = hex_to_u64(&receipt["gasUsed"]).unwrap_or(0);
        info.status = match hex_to_u64(&receipt["status"]).unwrap_or(0) {
            1 => TxStatus::Success,
            _ => TxStatus::Failed,
        };

        if info.block_number > 0 {
            let current = self.get_block_number().await?;
            info.confirmations = current.saturating_sub(info.block_number) as u32 + 1;
        }

        Ok(Some(info))
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        hex_to_u64(&result)
            .ok_or_else(|| WalletError::Transient("invalid block number response".to_string()))
    }

    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        contract: Option<&str>,
    ) -> WalletResult<String> {
        let nonce = self
            .rpc("eth_getTransactionCount", json!([from, "pending"]))
            .await
            .and_then(|v| {
                hex_to_u64(&v)
                    .ok_or_else(|| WalletError::Transient("invalid nonce response".to_string()))
            })?;

        let gas_price = self.rpc("eth_gasPrice", json!([])).await?;
        let gas_price = hex_quantity_to_decimal(&gas_price)?;

        let value: u128 = amount
            .parse()
            .map_err(|_| WalletError::InvalidArgument(format!("invalid amount: {amount}")))?;

        // ERC-20 transfers move the value into calldata and target the contract
        let (target, value, data, gas) = match contract {
            Some(contract) => (
                contract.to_string(),
                0u128,
                erc20_transfer_calldata(to, value),
                TOKEN_TRANSFER_GAS,
            ),
            None => (to.to_string(), value, String::new(), TRANSFER_GAS),
        };

        let unsigned = json!({
            "chain_id": self.chain_id,
            "nonce": nonce,
            "to": target,
            "value": value.to_string(),
            "gas": gas,
            "gas_price": gas_price,
            "data": data,
        });

        Ok(unsigned.to_string())
    }

    async fn broadcast_transaction(&self, signed_tx: &str) -> WalletResult<String> {
        let result = self
            .rpc_with_timeout("eth_sendRawTransaction", json!([signed_tx]), BROADCAST_TIMEOUT)
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::Terminal("broadcast returned no hash".to_string()))
    }

    async fn estimate_fee(&self, _from: &str, _to: &str, _amount: &str) -> WalletResult<String> {
        let gas_price = self.rpc("eth_gasPrice", json!([])).await?;
        let gas_price = hex_to_u128(&gas_price)
            .ok_or_else(|| WalletError::Transient("invalid gas price response".to_string()))?;
        Ok((gas_price.saturating_mul(TRANSFER_GAS as u128)).to_string())
    }

    fn validate_address(&self, address: &str) -> bool {
        validate_address("ethereum", address)
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
impl BlockSource for EthereumAdapter {
    async fn get_block(&self, height: u64) -> WalletResult<Block> {
        let result = self
            .rpc(
                "eth_getBlockByNumber",
                json!([format!("0x{height:x}"), false]),
            )
            .await?;
        if result.is_null() {
            return Err(WalletError::Transient(format!("block {height} not available")));
        }

        let transactions = result["transactions"]
            .as_array()
            .map(|txs| {
                txs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Block {
            number: height,
            hash: str_field(&result, "hash"),
            parent_hash: str_field(&result, "parentHash"),
            timestamp: hex_to_u64(&result["timestamp"]).unwrap_or(0) as i64,
            transactions,
        })
    }
}

#[async_trait]
impl LogSource for EthereumAdapter {
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[String],
    ) -> WalletResult<Vec<EventLog>> {
        let mut filter = json!({
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
        });
        if !addresses.is_empty() {
            filter["address"] = json!(addresses);
        }

        let result = self.rpc("eth_getLogs", json!([filter])).await?;
        let Some(entries) = result.as_array() else {
            return Ok(Vec::new());
        };

        let logs = entries
            .iter()
            .map(|entry| EventLog {
                address: str_field(entry, "address"),
                topics: entry["topics"]
                    .as_array()
                    .map(|t| {
                        t.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                data: str_field(entry, "data"),
                tx_hash: str_field(entry, "transactionHash"),
                block_number: hex_to_u64(&entry["blockNumber"]).unwrap_or(0),
            })
            .collect();

        Ok(logs)
    }
}

/// transfer(address,uint256) calldata
fn erc20_transfer_calldata(to: &str, amount: u128) -> String {
    format!(
        "0xa9059cbb{:0>64}{:064x}",
        to.trim_start_matches("0x"),
        amount
    )
}

fn classify_reqwest(e: reqwest::Error) -> WalletError {
    // Connection problems and deadlines are worth retrying; anything the
    // server actively rejected is not.
    if e.is_timeout() || e.is_connect() || e.is_request() {
        WalletError::Transient(e.to_string())
    } else {
        WalletError::Terminal(e.to_string())
    }
}

fn classify_rpc_error(message: String) -> WalletError {
    let lower = message.to_lowercase();
    let terminal = lower.contains("nonce too low")
        || lower.contains("insufficient funds")
        || lower.contains("already known")
        || lower.contains("invalid")
        || lower.contains("underpriced");
    if terminal {
        WalletError::Terminal(message)
    } else {
        WalletError::Transient(message)
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn hex_to_u64(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn hex_to_u128(value: &Value) -> Option<u128> {
    let s = value.as_str()?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn hex_quantity_to_decimal(value: &Value) -> WalletResult<String> {
    hex_to_u128(value)
        .map(|v| v.to_string())
        .ok_or_else(|| WalletError::Transient("invalid hex quantity".to_string()))
}
