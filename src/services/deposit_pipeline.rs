//! Deposit pipeline: chain scanning, confirmation tracking, idempotent
//! credit and sweep-task generation.
//!
//! The scanner advances `scan_progress` only after a block has been fully
//! processed; a failed block aborts the tick so the next one re-attempts
//! from the same height. Re-scans are harmless because `process_deposit` is
//! idempotent on (chain, tx_hash).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::chain::{ChainAdapter, TRANSFER_TOPIC};
use crate::db::{with_conn, DbPool};
use crate::error::{WalletError, WalletResult};
use crate::models::audit_log::{action, module, NewAuditLog};
use crate::models::balance::Balance;
use crate::models::deposit::{
    Deposit, DepositAddress, DepositStatus, NewDeposit, NewDepositAddress, NewSweepTask,
    ScanProgress, SweepTask,
};
use crate::models::notification::NotificationKind;
use crate::services::audit::AuditSink;
use crate::services::events::{EventBus, Notifier, WalletEvent};
use crate::services::key_manager::{generate_request_id, KeyManager};
use crate::services::wallet::default_currency;

/// Batch bound for confirmation and credit sweeps
const BATCH_LIMIT: i64 = 100;

pub struct DepositPipeline {
    pool: DbPool,
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    key_manager: Arc<KeyManager>,
    audit: AuditSink,
    events: EventBus,
    notifier: Notifier,
    /// Scanner window bound per tick
    max_scan_blocks: u64,
    /// Consolidation target per chain
    hot_wallets: HashMap<String, String>,
}

impl DepositPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        adapters: HashMap<String, Arc<dyn ChainAdapter>>,
        key_manager: Arc<KeyManager>,
        audit: AuditSink,
        events: EventBus,
        notifier: Notifier,
        max_scan_blocks: u64,
        hot_wallets: HashMap<String, String>,
    ) -> Self {
        Self {
            pool,
            adapters,
            key_manager,
            audit,
            events,
            notifier,
            max_scan_blocks,
            hot_wallets,
        }
    }

    pub fn chains(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    fn adapter(&self, chain: &str) -> WalletResult<&Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain)
            .ok_or(WalletError::Unsupported("chain"))
    }

    /// Allocate (or return) the stable deposit address for (user, chain).
    ///
    /// The first generated wallet address on the chain becomes the deposit
    /// address; one is derived on demand if the user has none yet.
    pub async fn allocate_deposit_address(
        &self,
        user_id: i64,
        chain: &str,
    ) -> WalletResult<DepositAddress> {
        let chain_owned = chain.to_string();
        let existing = with_conn(&self.pool, move |conn| {
            DepositAddress::find_for_user(conn, user_id, &chain_owned)
        })
        .await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let (address, _path) = self.key_manager.generate_address(user_id, chain).await?;

        let new_address = NewDepositAddress {
            user_id,
            chain: chain.to_string(),
            address: address.clone(),
            label: String::new(),
        };
        let row =
            with_conn(&self.pool, move |conn| DepositAddress::create(conn, new_address)).await?;

        tracing::info!(user_id, chain, %address, "Deposit address allocated");
        Ok(row)
    }

    pub async fn get_deposit_address(&self, user_id: i64, chain: &str) -> WalletResult<DepositAddress> {
        let chain = chain.to_string();
        with_conn(&self.pool, move |conn| {
            DepositAddress::find_for_user(conn, user_id, &chain)
        })
        .await?
        .ok_or(WalletError::NotFound("deposit address"))
    }

    /// Record an observed inbound transfer. Idempotent on (chain, tx_hash);
    /// transfers to unknown addresses are silently ignored.
    pub async fn process_deposit(
        &self,
        chain: &str,
        tx_hash: &str,
        from: &str,
        to: &str,
        currency: &str,
        amount: &str,
        block_number: u64,
    ) -> WalletResult<()> {
        let chain = chain.to_string();
        let tx_hash = tx_hash.to_string();
        let from = from.to_string();
        let to = to.to_string();
        let currency = currency.to_string();
        let amount = amount.to_string();

        let created = with_conn(&self.pool, move |conn| {
            if Deposit::find_by_chain_tx(conn, &chain, &tx_hash)?.is_some() {
                return Ok(None);
            }

            let Some(owner) = DepositAddress::find_by_chain_address(conn, &chain, &to)? else {
                return Ok(None);
            };

            let deposit = Deposit::create(
                conn,
                NewDeposit {
                    uuid: uuid::Uuid::new_v4().to_string(),
                    user_id: owner.user_id,
                    chain: chain.clone(),
                    tx_hash: tx_hash.clone(),
                    from_address: from,
                    to_address: to,
                    currency,
                    contract_address: None,
                    amount,
                    status: DepositStatus::Pending.as_str().to_string(),
                    block_number: block_number as i64,
                },
            )?;
            Ok(Some(deposit))
        })
        .await?;

        if let Some(deposit) = created {
            tracing::info!(
                chain = %deposit.chain,
                tx_hash = %deposit.tx_hash,
                amount = %deposit.amount,
                "Deposit detected"
            );
            self.events.publish(WalletEvent::DepositDetected {
                user_id: deposit.user_id,
                chain: deposit.chain.clone(),
                tx_hash: deposit.tx_hash.clone(),
                amount: deposit.amount.clone(),
            });
        }

        Ok(())
    }

    /// One scanner pass over a chain: walk `(last, clamped]`, feeding every
    /// relevant native transfer and ERC-20 Transfer event through
    /// `process_deposit`, advancing the checkpoint block by block.
    pub async fn scan_deposits(&self, chain: &str) -> WalletResult<()> {
        let adapter = self.adapter(chain)?;

        let chain_owned = chain.to_string();
        let last = with_conn(&self.pool, move |conn| {
            ScanProgress::get(conn, &chain_owned)
        })
        .await?;

        let latest = adapter.get_block_number().await?;
        let target = latest.min(last + self.max_scan_blocks);
        if target <= last {
            return Ok(());
        }

        // Lowercased lookup set of our addresses on this chain
        let chain_owned = chain.to_string();
        let addresses = with_conn(&self.pool, move |conn| {
            DepositAddress::list_for_chain(conn, &chain_owned)
        })
        .await?;
        let address_set: HashSet<String> =
            addresses.iter().map(|a| a.address.to_lowercase()).collect();

        let native = default_currency(chain);

        for height in (last + 1)..=target {
            if let Some(blocks) = adapter.block_source() {
                let block = match blocks.get_block(height).await {
                    Ok(block) => block,
                    Err(e) => {
                        // do not advance; the next tick re-attempts this block
                        tracing::warn!(chain, height, "Block fetch failed: {e}");
                        return Ok(());
                    }
                };

                for tx_hash in &block.transactions {
                    if tx_hash.is_empty() {
                        continue;
                    }
                    let info = match adapter.get_transaction(tx_hash).await {
                        Ok(Some(info)) => info,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::debug!(chain, tx_hash = %tx_hash, "Transaction lookup failed: {e}");
                            continue;
                        }
                    };
                    if info.to.is_empty() || info.amount.is_empty() || info.amount == "0" {
                        continue;
                    }
                    if address_set.contains(&info.to.to_lowercase()) {
                        self.process_deposit(
                            chain,
                            &info.tx_hash,
                            &info.from,
                            &info.to,
                            native,
                            &info.amount,
                            height,
                        )
                        .await?;
                    }
                }
            }

            if let Some(logs) = adapter.log_source() {
                match logs.get_logs(height, height, &[]).await {
                    Ok(entries) => {
                        for entry in entries {
                            let Some((from, to, amount)) = decode_transfer_log(
                                &entry.topics,
                                &entry.data,
                            ) else {
                                continue;
                            };
                            if !address_set.contains(&to.to_lowercase()) {
                                continue;
                            }
                            // token deposits are keyed by the emitting contract
                            self.process_deposit(
                                chain,
                                &entry.tx_hash,
                                &from,
                                &to,
                                &entry.address,
                                &amount,
                                height,
                            )
                            .await?;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(chain, height, "Log query failed: {e}");
                    }
                }
            }

            let chain_owned = chain.to_string();
            with_conn(&self.pool, move |conn| {
                ScanProgress::set(conn, &chain_owned, height)
            })
            .await?;
        }

        tracing::info!(chain, from = last + 1, to = target, "Deposit scan complete");
        Ok(())
    }

    /// Update confirmation counts for deposits still in flight on a chain
    pub async fn check_confirmations(&self, chain: &str) -> WalletResult<()> {
        let adapter = self.adapter(chain)?;
        let required = adapter.required_confirmations();

        let chain_owned = chain.to_string();
        let deposits = with_conn(&self.pool, move |conn| {
            Deposit::list_awaiting_confirmation(conn, &chain_owned, BATCH_LIMIT)
        })
        .await?;
        if deposits.is_empty() {
            return Ok(());
        }

        let current_block = adapter.get_block_number().await?;

        for deposit in deposits {
            let mut block_number = deposit.block_number as u64;
            let mut block_hash = deposit.block_hash.clone();

            if block_number == 0 {
                match adapter.get_transaction(&deposit.tx_hash).await {
                    Ok(Some(info)) if info.block_number > 0 => {
                        block_number = info.block_number;
                        block_hash = Some(info.block_hash);
                    }
                    Ok(_) => continue,
                    Err(e) if e.is_transient() => {
                        tracing::debug!(tx_hash = %deposit.tx_hash, "Lookup failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(tx_hash = %deposit.tx_hash, "Lookup failed: {e}");
                        continue;
                    }
                }
            }

            if block_number == 0 {
                continue;
            }

            let confirmations = (current_block.saturating_sub(block_number) + 1) as i32;
            let status = if confirmations >= required as i32 {
                DepositStatus::Confirmed
            } else {
                DepositStatus::Confirming
            };

            with_conn(&self.pool, move |conn| {
                Deposit::update_confirmations(
                    conn,
                    deposit.id,
                    confirmations,
                    block_number as i64,
                    block_hash.as_deref(),
                    status,
                )
            })
            .await?;

            if status == DepositStatus::Confirmed {
                tracing::info!(
                    tx_hash = %deposit.tx_hash,
                    confirmations,
                    "Deposit confirmed"
                );
            }
        }

        Ok(())
    }

    /// Credit every confirmed-but-uncredited deposit exactly once
    pub async fn process_credits(&self) -> WalletResult<()> {
        let deposits =
            with_conn(&self.pool, move |conn| Deposit::list_credit_ready(conn, BATCH_LIMIT)).await?;

        for deposit in deposits {
            if let Err(e) = self.credit_deposit(deposit.id).await {
                tracing::error!(deposit_id = deposit.id, "Failed to credit deposit: {e}");
            }
        }
        Ok(())
    }

    /// Atomic credit: the ledger increment and the `credited` CAS commit in
    /// one transaction, so a crash or a concurrent tick can never double-pay.
    pub async fn credit_deposit(&self, deposit_id: i64) -> WalletResult<()> {
        let credited = with_conn(&self.pool, move |conn| {
            conn.immediate_transaction(|conn| {
                let Some(deposit) = Deposit::find_by_id(conn, deposit_id)? else {
                    return Err(WalletError::NotFound("deposit"));
                };
                if deposit.credited {
                    return Ok(None);
                }

                if !Deposit::mark_credited(conn, deposit.id)? {
                    return Ok(None);
                }
                Balance::increment_within(
                    conn,
                    deposit.user_id,
                    &deposit.chain,
                    &deposit.currency,
                    &deposit.amount,
                )?;
                Ok(Some(deposit))
            })
        })
        .await?;

        let Some(deposit) = credited else {
            return Ok(());
        };

        tracing::info!(
            tx_hash = %deposit.tx_hash,
            amount = %deposit.amount,
            currency = %deposit.currency,
            user_id = deposit.user_id,
            "Deposit credited"
        );

        self.audit.log_async(NewAuditLog::success(
            deposit.user_id,
            module::DEPOSIT,
            action::CREDIT,
            &deposit.uuid,
            format!("{} {} credited on {}", deposit.amount, deposit.currency, deposit.chain),
        ));
        self.events.publish(WalletEvent::DepositCredited {
            user_id: deposit.user_id,
            chain: deposit.chain.clone(),
            currency: deposit.currency.clone(),
            amount: deposit.amount.clone(),
        });
        let notice = self
            .notifier
            .enqueue(
                deposit.user_id,
                NotificationKind::DepositCredited,
                "Deposit credited".to_string(),
                format!("{} {} arrived on {}", deposit.amount, deposit.currency, deposit.chain),
            )
            .await;
        if let Err(e) = notice {
            tracing::warn!("Failed to enqueue deposit notification: {e}");
        }

        self.generate_sweep_task(&deposit).await;

        Ok(())
    }

    /// Queue consolidation of a credited deposit to the chain's hot wallet
    async fn generate_sweep_task(&self, deposit: &Deposit) {
        let Some(hot_wallet) = self.hot_wallets.get(&deposit.chain) else {
            return;
        };
        if hot_wallet.is_empty() || deposit.swept {
            return;
        }

        let task = NewSweepTask {
            chain: deposit.chain.clone(),
            from_address: deposit.to_address.clone(),
            to_address: hot_wallet.clone(),
            currency: deposit.currency.clone(),
            amount: deposit.amount.clone(),
        };
        let deposit_id = deposit.id;
        let result = with_conn(&self.pool, move |conn| {
            let task = SweepTask::create(conn, task)?;
            Deposit::mark_swept(conn, deposit_id, None)?;
            Ok(task)
        })
        .await;

        match result {
            Ok(task) => tracing::info!(
                chain = %task.chain,
                from = %task.from_address,
                "Sweep task queued"
            ),
            Err(e) => tracing::error!("Failed to create sweep task: {e}"),
        }
    }

    /// Best-effort processing of pending sweep tasks: build, sign with the
    /// deposit address key, broadcast. Failures park the task as failed for
    /// operator attention.
    pub async fn process_sweep_tasks(&self, chain: &str) -> WalletResult<()> {
        let adapter = self.adapter(chain)?;

        let chain_owned = chain.to_string();
        let tasks = with_conn(&self.pool, move |conn| {
            SweepTask::list_pending(conn, &chain_owned, 50)
        })
        .await?;

        for task in tasks {
            let outcome = self.execute_sweep(adapter, &task).await;
            match outcome {
                Ok(tx_hash) => {
                    with_conn(&self.pool, move |conn| {
                        SweepTask::mark_success(conn, task.id, &tx_hash)
                    })
                    .await?;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(task_id = task.id, "Sweep deferred: {e}");
                }
                Err(e) => {
                    let message = e.to_string();
                    with_conn(&self.pool, move |conn| {
                        SweepTask::mark_failed(conn, task.id, &message)
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn execute_sweep(
        &self,
        adapter: &Arc<dyn ChainAdapter>,
        task: &SweepTask,
    ) -> WalletResult<String> {
        let raw = adapter
            .build_transaction(&task.from_address, &task.to_address, &task.amount, None)
            .await?;

        let key = self
            .key_manager
            .get_key_by_address(&task.chain, &task.from_address)
            .await?;
        let request = self
            .key_manager
            .sign_with_request_id(
                &generate_request_id(),
                key.user_id,
                &task.chain,
                &task.from_address,
                raw.as_bytes(),
            )
            .await?;

        let signed = request
            .signed_tx
            .ok_or_else(|| WalletError::Internal("signature request missing payload".to_string()))?;
        adapter.broadcast_transaction(&signed).await
    }

    pub async fn get_deposit(&self, uuid: &str) -> WalletResult<Deposit> {
        let uuid = uuid.to_string();
        with_conn(&self.pool, move |conn| Deposit::find_by_uuid(conn, &uuid))
            .await?
            .ok_or(WalletError::NotFound("deposit"))
    }

    pub async fn list_deposits(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> WalletResult<(Vec<Deposit>, i64)> {
        with_conn(&self.pool, move |conn| {
            Deposit::list_by_user(conn, user_id, page, page_size)
        })
        .await
    }
}

/// Decode an ERC-20 Transfer event into (from, to, amount-decimal).
///
/// Values wider than u128 are outside the ledger's domain and are rejected.
fn decode_transfer_log(topics: &[String], data: &str) -> Option<(String, String, String)> {
    if topics.len() < 3 || !topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return None;
    }

    let from = topic_to_address(&topics[1])?;
    let to = topic_to_address(&topics[2])?;

    let raw = hex::decode(data.trim_start_matches("0x")).ok()?;
    if raw.len() != 32 {
        return None;
    }
    if raw[..16].iter().any(|&b| b != 0) {
        tracing::warn!("Transfer amount exceeds u128, skipping");
        return None;
    }
    let amount = u128::from_be_bytes(raw[16..].try_into().ok()?);

    Some((from, to, amount.to_string()))
}

/// Last 20 bytes of a 32-byte topic, as a 0x address
fn topic_to_address(topic: &str) -> Option<String> {
    let raw = hex::decode(topic.trim_start_matches("0x")).ok()?;
    if raw.len() != 32 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&raw[12..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_transfer_log() {
        let topics = vec![
            TRANSFER_TOPIC.to_string(),
            format!("0x{:0>64}", "aa11223344556677889900aabbccddeeff001122"),
            format!("0x{:0>64}", "bb11223344556677889900aabbccddeeff001122"),
        ];
        let data = format!("0x{:064x}", 1_500_000_000_000_000_000u128);

        let (from, to, amount) = decode_transfer_log(&topics, &data).unwrap();
        assert_eq!(from, "0xaa11223344556677889900aabbccddeeff001122");
        assert_eq!(to, "0xbb11223344556677889900aabbccddeeff001122");
        assert_eq!(amount, "1500000000000000000");
    }

    #[test]
    fn test_decode_rejects_foreign_topic() {
        let topics = vec![
            "0x0000000000000000000000000000000000000000000000000000000000000000".to_string(),
            format!("0x{:0>64}", "aa"),
            format!("0x{:0>64}", "bb"),
        ];
        assert!(decode_transfer_log(&topics, &format!("0x{:064x}", 1u128)).is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_amount() {
        let topics = vec![
            TRANSFER_TOPIC.to_string(),
            format!("0x{:0>64}", "aa"),
            format!("0x{:0>64}", "bb"),
        ];
        // top 16 bytes non-zero
        let data = format!("0x{}", "ff".repeat(32));
        assert!(decode_transfer_log(&topics, &data).is_none());
    }

    #[test]
    fn test_decode_rejects_short_topics() {
        assert!(decode_transfer_log(&[TRANSFER_TOPIC.to_string()], "0x00").is_none());
    }
}
