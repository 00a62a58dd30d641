//! Tron adapter over the TronGrid/full-node HTTP API.
//!
//! Addresses are base58check on the wire (`visible: true`). The node builds
//! unsigned transfer transactions server-side via `createtransaction`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chain::{ChainAdapter, TransactionInfo, TxStatus};
use crate::crypto::address::validate_address;
use crate::error::{WalletError, WalletResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Flat bandwidth-fee estimate in sun, matching a plain TRX transfer
const TRANSFER_FEE_SUN: &str = "1100000";

pub struct TronAdapter {
    rpc_url: String,
    api_key: String,
    confirmations: u32,
    client: reqwest::Client,
}

impl TronAdapter {
    pub fn new(rpc_url: &str, api_key: &str, confirmations: u32) -> Self {
        Self {
            rpc_url: rpc_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            confirmations,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> WalletResult<Value> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.rpc_url))
            .timeout(HTTP_TIMEOUT)
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("TRON-PRO-API-KEY", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| WalletError::Transient(format!("malformed tron response: {e}")))
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    fn name(&self) -> &str {
        "tron"
    }

    async fn get_balance(&self, address: &str) -> WalletResult<String> {
        let account = self
            .post("/wallet/getaccount", json!({ "address": address, "visible": true }))
            .await?;
        // Missing account means never funded
        let balance = account["balance"].as_u64().unwrap_or(0);
        Ok(balance.to_string())
    }

    async fn get_token_balance(&self, _address: &str, _contract: &str) -> WalletResult<String> {
        // TRC-20 balances need triggerconstantcontract; not wired up yet
        Err(WalletError::Unsupported("tron token balance"))
    }

    async fn get_transaction(&self, tx_hash: &str) -> WalletResult<Option<TransactionInfo>> {
        let info = self
            .post("/wallet/gettransactioninfobyid", json!({ "value": tx_hash }))
            .await?;
        if info.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Ok(None);
        }

        let mut tx = TransactionInfo::pending(tx_hash);
        tx.block_number = info["blockNumber"].as_u64().unwrap_or(0);
        tx.fee = info["fee"].as_u64().unwrap_or(0).to_string();
        tx.timestamp = info["blockTimeStamp"].as_i64().unwrap_or(0) / 1000;
        tx.status = match info["receipt"]["result"].as_str() {
            None if tx.block_number > 0 => TxStatus::Success, // plain transfers carry no receipt result
            Some("SUCCESS") => TxStatus::Success,
            Some(_) => TxStatus::Failed,
            None => TxStatus::Pending,
        };

        if tx.block_number > 0 {
            let current = self.get_block_number().await?;
            tx.confirmations = current.saturating_sub(tx.block_number) as u32 + 1;
        }

        // Sender/recipient live on the transaction body
        let body = self
            .post("/wallet/gettransactionbyid", json!({ "value": tx_hash, "visible": true }))
            .await?;
        if let Some(value) = body["raw_data"]["contract"][0]["parameter"]["value"].as_object() {
            tx.from = value
                .get("owner_address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tx.to = value
                .get("to_address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tx.amount = value.get("amount").and_then(Value::as_u64).unwrap_or(0).to_string();
        }

        Ok(Some(tx))
    }

    async fn get_block_number(&self) -> WalletResult<u64> {
        let block = self.post("/wallet/getnowblock", json!({})).await?;
        block["block_header"]["raw_data"]["number"]
            .as_u64()
            .ok_or_else(|| WalletError::Transient("missing block number".to_string()))
    }

    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        contract: Option<&str>,
    ) -> WalletResult<String> {
        if contract.is_some() {
            return Err(WalletError::Unsupported("tron token transfer"));
        }

        let amount: u64 = amount
            .parse()
            .map_err(|_| WalletError::InvalidArgument(format!("invalid amount: {amount}")))?;

        let tx = self
            .post(
                "/wallet/createtransaction",
                json!({
                    "owner_address": from,
                    "to_address": to,
                    "amount": amount,
                    "visible": true,
                }),
            )
            .await?;

        if let Some(error) = tx.get("Error").and_then(Value::as_str) {
            return Err(WalletError::Terminal(error.to_string()));
        }

        Ok(tx.to_string())
    }

    async fn broadcast_transaction(&self, signed_tx: &str) -> WalletResult<String> {
        let tx: Value = serde_json::from_str(signed_tx)
            .map_err(|_| WalletError::Terminal("signed tx is not valid json".to_string()))?;

        let result = self.post("/wallet/broadcasttransaction", tx.clone()).await?;
        if result["result"].as_bool() != Some(true) {
            let message = result["message"].as_str().unwrap_or("broadcast rejected");
            return Err(WalletError::Terminal(message.to_string()));
        }

        tx["txID"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::Terminal("signed tx missing txID".to_string()))
    }

    async fn estimate_fee(&self, _from: &str, _to: &str, _amount: &str) -> WalletResult<String> {
        Ok(TRANSFER_FEE_SUN.to_string())
    }

    fn validate_address(&self, address: &str) -> bool {
        validate_address("tron", address)
    }

    fn required_confirmations(&self) -> u32 {
        self.confirmations
    }
}
