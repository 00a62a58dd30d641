//! Withdrawal pipeline: intake, review, processing and finalization.
//!
//! Intake order matters: balance check, limits, risk, then freeze, then
//! insert. A risk block fails before any money moves; an insert failure
//! after the freeze rolls the freeze back. From Approved onwards the frozen
//! amount backs the withdrawal until Completed debits it or a failure path
//! releases it. Signing and broadcast failures deliberately leave the
//! amount frozen for operator triage, because the signing intent is already
//! on record.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::chain::{ChainAdapter, TxStatus};
use crate::db::{with_conn, DbPool};
use crate::error::{WalletError, WalletResult};
use crate::models::audit_log::{action, module, NewAuditLog};
use crate::models::balance::{parse_amount, Balance};
use crate::models::notification::NotificationKind;
use crate::models::withdrawal::{
    NewWithdrawal, NewWithdrawalLimit, Withdrawal, WithdrawalLimit, WithdrawalStatus,
};
use crate::services::audit::AuditSink;
use crate::services::events::{EventBus, Notifier, WalletEvent};
use crate::services::key_manager::{generate_request_id, KeyManager, PLATFORM_USER_ID};
use crate::services::ledger::Ledger;
use crate::services::risk_engine::{RiskEngine, WithdrawalRiskContext};

const BATCH_LIMIT: i64 = 50;
const CONFIRM_BATCH_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct CreateWithdrawalRequest {
    pub user_id: i64,
    pub chain: String,
    pub to_address: String,
    pub currency: String,
    pub amount: String,
    pub contract_address: Option<String>,
    pub memo: Option<String>,
}

pub struct WithdrawalPipeline {
    pool: DbPool,
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    ledger: Ledger,
    key_manager: Arc<KeyManager>,
    risk: RiskEngine,
    audit: AuditSink,
    events: EventBus,
    notifier: Notifier,
    /// Outbound hot wallet per chain, injected configuration
    hot_wallets: HashMap<String, String>,
}

impl WithdrawalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        adapters: HashMap<String, Arc<dyn ChainAdapter>>,
        ledger: Ledger,
        key_manager: Arc<KeyManager>,
        risk: RiskEngine,
        audit: AuditSink,
        events: EventBus,
        notifier: Notifier,
        hot_wallets: HashMap<String, String>,
    ) -> Self {
        Self {
            pool,
            adapters,
            ledger,
            key_manager,
            risk,
            audit,
            events,
            notifier,
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

    /// Synchronous intake under the caller's request
    pub async fn create_withdrawal(
        &self,
        request: CreateWithdrawalRequest,
    ) -> WalletResult<Withdrawal> {
        let amount = parse_amount(&request.amount)?;
        if amount <= Decimal::ZERO {
            return Err(WalletError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }

        // 1. balance precondition, before anything else touches the row
        let snapshot = self
            .ledger
            .read(request.user_id, &request.chain, &request.currency)
            .await?;
        if snapshot.available < amount {
            return Err(WalletError::InsufficientBalance);
        }

        // 2. limits
        self.check_limits(&request, amount).await?;

        // 3. risk, before freezing so a block leaves no trace on the ledger
        let risk = self
            .risk
            .check_withdrawal(&WithdrawalRiskContext {
                user_id: request.user_id,
                chain: request.chain.clone(),
                to_address: request.to_address.clone(),
                currency: request.currency.clone(),
                amount: request.amount.clone(),
            })
            .await?;
        if risk.blocked {
            return Err(WalletError::Blocked(risk.reason));
        }

        // 4. freeze; a racing withdrawal may win the balance here
        self.ledger
            .freeze(request.user_id, &request.chain, &request.currency, &request.amount)
            .await?;

        // fee estimate is advisory; intake proceeds without one
        let fee = match self.adapter(&request.chain) {
            Ok(adapter) => adapter
                .estimate_fee("", &request.to_address, &request.amount)
                .await
                .ok(),
            Err(_) => None,
        };

        // 5. derived status: blocked is unreachable here
        let status = if risk.need_manual_review {
            WithdrawalStatus::ManualReview
        } else if risk.risk_level > 0 {
            WithdrawalStatus::RiskReview
        } else {
            WithdrawalStatus::Approved
        };

        let new_withdrawal = NewWithdrawal {
            uuid: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id,
            chain: request.chain.clone(),
            to_address: request.to_address.clone(),
            currency: request.currency.clone(),
            contract_address: request.contract_address.clone(),
            amount: request.amount.clone(),
            fee,
            status: status.as_str().to_string(),
            risk_level: risk.risk_level,
            manual_review: risk.need_manual_review,
            memo: request.memo.clone(),
        };

        let inserted = with_conn(&self.pool, move |conn| {
            Withdrawal::create(conn, new_withdrawal)
        })
        .await;

        let withdrawal = match inserted {
            Ok(withdrawal) => withdrawal,
            Err(e) => {
                // 6. roll the freeze back before surfacing the error
                let rollback = self
                    .ledger
                    .unfreeze(request.user_id, &request.chain, &request.currency, &request.amount)
                    .await;
                if let Err(rollback_err) = rollback {
                    tracing::error!(
                        user_id = request.user_id,
                        "Failed to roll back freeze after insert error: {rollback_err}"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            uuid = %withdrawal.uuid,
            amount = %withdrawal.amount,
            currency = %withdrawal.currency,
            to = %withdrawal.to_address,
            status = %withdrawal.status,
            "Withdrawal created"
        );
        self.audit.log_async(NewAuditLog::success(
            withdrawal.user_id,
            module::WITHDRAWAL,
            action::CREATE,
            &withdrawal.uuid,
            format!(
                "{} {} to {} on {}",
                withdrawal.amount, withdrawal.currency, withdrawal.to_address, withdrawal.chain
            ),
        ));
        self.audit.log_async(NewAuditLog::success(
            withdrawal.user_id,
            module::LEDGER,
            action::FREEZE,
            &withdrawal.uuid,
            format!("{} {} frozen on {}", withdrawal.amount, withdrawal.currency, withdrawal.chain),
        ));
        self.events.publish(WalletEvent::WithdrawalCreated {
            user_id: withdrawal.user_id,
            uuid: withdrawal.uuid.clone(),
            status: withdrawal.status.clone(),
        });
        if status != WithdrawalStatus::Approved {
            let notice = self
                .notifier
                .enqueue(
                    withdrawal.user_id,
                    NotificationKind::WithdrawalReview,
                    "Withdrawal under review".to_string(),
                    format!("Withdrawal {} is awaiting review", withdrawal.uuid),
                )
                .await;
            if let Err(e) = notice {
                tracing::warn!("Failed to enqueue review notification: {e}");
            }
        }

        Ok(withdrawal)
    }

    async fn check_limits(
        &self,
        request: &CreateWithdrawalRequest,
        amount: Decimal,
    ) -> WalletResult<()> {
        let (user_id, chain, currency) = (
            request.user_id,
            request.chain.clone(),
            request.currency.clone(),
        );
        let limit = with_conn(&self.pool, move |conn| {
            WithdrawalLimit::effective(conn, user_id, &chain, &currency)
        })
        .await?;

        let Some(limit) = limit else {
            return Ok(());
        };

        if let Some(min) = decimal_field(&limit.min_amount)? {
            if amount < min {
                return Err(WalletError::BelowMin);
            }
        }
        if let Some(max) = decimal_field(&limit.max_amount)? {
            if amount > max {
                return Err(WalletError::ExceedLimit("single"));
            }
        }
        if let Some(daily) = decimal_field(&limit.daily_limit)? {
            let (user_id, chain, currency) = (
                request.user_id,
                request.chain.clone(),
                request.currency.clone(),
            );
            let spent_today = with_conn(&self.pool, move |conn| {
                Withdrawal::daily_total(conn, user_id, &chain, &currency)
            })
            .await?;
            if spent_today + amount > daily {
                return Err(WalletError::ExceedLimit("daily"));
            }
        }

        Ok(())
    }

    /// Reviewer approval: review states only, balance stays frozen
    pub async fn approve(&self, withdrawal_id: i64, reviewer_id: i64, note: &str) -> WalletResult<()> {
        let withdrawal = self.get_by_id(withdrawal_id).await?;
        match withdrawal.status() {
            WithdrawalStatus::RiskReview | WithdrawalStatus::ManualReview => {}
            other => {
                return Err(WalletError::Conflict(format!(
                    "withdrawal is not awaiting review (status {})",
                    other.as_str()
                )))
            }
        }

        let note = note.to_string();
        with_conn(&self.pool, move |conn| {
            Withdrawal::set_review(conn, withdrawal_id, WithdrawalStatus::Approved, reviewer_id, &note)
        })
        .await?;

        tracing::info!(uuid = %withdrawal.uuid, reviewer_id, "Withdrawal approved");
        self.audit.log_async(NewAuditLog::success(
            reviewer_id,
            module::WITHDRAWAL,
            action::APPROVE,
            &withdrawal.uuid,
            String::new(),
        ));
        Ok(())
    }

    /// Reviewer rejection: releases the frozen amount
    pub async fn reject(&self, withdrawal_id: i64, reviewer_id: i64, note: &str) -> WalletResult<()> {
        let withdrawal = self.get_by_id(withdrawal_id).await?;
        match withdrawal.status() {
            WithdrawalStatus::Pending
            | WithdrawalStatus::RiskReview
            | WithdrawalStatus::ManualReview => {}
            other => {
                return Err(WalletError::Conflict(format!(
                    "withdrawal cannot be rejected (status {})",
                    other.as_str()
                )))
            }
        }

        let note = note.to_string();
        with_conn(&self.pool, move |conn| {
            Withdrawal::set_review(conn, withdrawal_id, WithdrawalStatus::Rejected, reviewer_id, &note)
        })
        .await?;
        self.ledger
            .unfreeze(withdrawal.user_id, &withdrawal.chain, &withdrawal.currency, &withdrawal.amount)
            .await?;

        tracing::info!(uuid = %withdrawal.uuid, reviewer_id, "Withdrawal rejected");
        self.audit.log_async(NewAuditLog::success(
            reviewer_id,
            module::WITHDRAWAL,
            action::REJECT,
            &withdrawal.uuid,
            String::new(),
        ));
        self.audit.log_async(NewAuditLog::success(
            withdrawal.user_id,
            module::LEDGER,
            action::UNFREEZE,
            &withdrawal.uuid,
            format!("{} {} released", withdrawal.amount, withdrawal.currency),
        ));
        Ok(())
    }

    /// User-initiated cancel, only before approval
    pub async fn cancel(&self, withdrawal_id: i64, user_id: i64) -> WalletResult<()> {
        let withdrawal = self.get_by_id(withdrawal_id).await?;
        if withdrawal.user_id != user_id {
            return Err(WalletError::Forbidden(
                "withdrawal does not belong to caller".to_string(),
            ));
        }
        match withdrawal.status() {
            WithdrawalStatus::Pending
            | WithdrawalStatus::RiskReview
            | WithdrawalStatus::ManualReview => {}
            other => {
                return Err(WalletError::Conflict(format!(
                    "withdrawal cannot be cancelled (status {})",
                    other.as_str()
                )))
            }
        }

        with_conn(&self.pool, move |conn| {
            Withdrawal::set_status(conn, withdrawal_id, WithdrawalStatus::Cancelled)
        })
        .await?;
        self.ledger
            .unfreeze(withdrawal.user_id, &withdrawal.chain, &withdrawal.currency, &withdrawal.amount)
            .await?;

        tracing::info!(uuid = %withdrawal.uuid, user_id, "Withdrawal cancelled");
        self.audit.log_async(NewAuditLog::success(
            user_id,
            module::WITHDRAWAL,
            action::CANCEL,
            &withdrawal.uuid,
            String::new(),
        ));
        self.audit.log_async(NewAuditLog::success(
            withdrawal.user_id,
            module::LEDGER,
            action::UNFREEZE,
            &withdrawal.uuid,
            format!("{} {} released", withdrawal.amount, withdrawal.currency),
        ));
        Ok(())
    }

    /// One processor pass: build, sign and broadcast approved withdrawals.
    ///
    /// Rows left in Processing by an interrupted tick are picked up again;
    /// the scheduler guarantees a single in-flight invocation.
    pub async fn process_approved(&self) -> WalletResult<()> {
        let mut batch = with_conn(&self.pool, move |conn| {
            Withdrawal::list_by_status(conn, WithdrawalStatus::Approved, BATCH_LIMIT)
        })
        .await?;
        let stale = with_conn(&self.pool, move |conn| {
            Withdrawal::list_by_status(conn, WithdrawalStatus::Processing, BATCH_LIMIT)
        })
        .await?;
        batch.extend(stale);

        for withdrawal in batch {
            if let Err(e) = self.process_one(&withdrawal).await {
                tracing::error!(uuid = %withdrawal.uuid, "Failed to process withdrawal: {e}");
            }
        }
        Ok(())
    }

    async fn process_one(&self, withdrawal: &Withdrawal) -> WalletResult<()> {
        let adapter = self.adapter(&withdrawal.chain)?;

        let hot_wallet = self
            .hot_wallets
            .get(&withdrawal.chain)
            .filter(|address| !address.is_empty())
            .ok_or(WalletError::Unsupported("hot wallet not configured"))?
            .clone();

        let withdrawal_id = withdrawal.id;
        with_conn(&self.pool, move |conn| {
            Withdrawal::set_status(conn, withdrawal_id, WithdrawalStatus::Processing)
        })
        .await?;

        let outcome = self.build_sign_broadcast(adapter, withdrawal, &hot_wallet).await;

        match outcome {
            Ok(tx_hash) => {
                let withdrawal_id = withdrawal.id;
                let tx_hash_owned = tx_hash.clone();
                let hot_wallet_owned = hot_wallet.clone();
                with_conn(&self.pool, move |conn| {
                    Withdrawal::mark_broadcast(conn, withdrawal_id, &tx_hash_owned, &hot_wallet_owned)
                })
                .await?;

                tracing::info!(uuid = %withdrawal.uuid, %tx_hash, "Withdrawal broadcast");
                self.audit.log_async(NewAuditLog::success(
                    withdrawal.user_id,
                    module::WITHDRAWAL,
                    action::BROADCAST,
                    &withdrawal.uuid,
                    tx_hash.clone(),
                ));
                self.events.publish(WalletEvent::WithdrawalBroadcast {
                    user_id: withdrawal.user_id,
                    uuid: withdrawal.uuid.clone(),
                    tx_hash,
                });
                Ok(())
            }
            Err(e) => {
                // the frozen amount is deliberately NOT released: the signing
                // intent is on record and needs operator triage
                let withdrawal_id = withdrawal.id;
                let message = e.to_string();
                with_conn(&self.pool, move |conn| {
                    Withdrawal::mark_failed(conn, withdrawal_id, &message)
                })
                .await?;

                self.audit.log_async(NewAuditLog::failure(
                    withdrawal.user_id,
                    module::WITHDRAWAL,
                    action::FAIL,
                    &withdrawal.uuid,
                    e.to_string(),
                ));
                self.events.publish(WalletEvent::WithdrawalFailed {
                    user_id: withdrawal.user_id,
                    uuid: withdrawal.uuid.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn build_sign_broadcast(
        &self,
        adapter: &Arc<dyn ChainAdapter>,
        withdrawal: &Withdrawal,
        hot_wallet: &str,
    ) -> WalletResult<String> {
        let raw_tx = adapter
            .build_transaction(
                hot_wallet,
                &withdrawal.to_address,
                &withdrawal.amount,
                withdrawal.contract_address.as_deref(),
            )
            .await?;

        let request = self
            .key_manager
            .sign_with_request_id(
                &generate_request_id(),
                PLATFORM_USER_ID,
                &withdrawal.chain,
                hot_wallet,
                raw_tx.as_bytes(),
            )
            .await?;
        let signed = request
            .signed_tx
            .ok_or_else(|| WalletError::Internal("signature request missing payload".to_string()))?;

        adapter.broadcast_transaction(&signed).await
    }

    /// Finalizer pass for one chain: track confirmations of broadcast rows,
    /// completing or failing them from chain state.
    pub async fn check_confirmations(&self, chain: &str) -> WalletResult<()> {
        let adapter = self.adapter(chain)?;
        let required = adapter.required_confirmations();

        let chain_owned = chain.to_string();
        let batch = with_conn(&self.pool, move |conn| {
            Withdrawal::list_awaiting_confirmation(conn, &chain_owned, CONFIRM_BATCH_LIMIT)
        })
        .await?;

        for withdrawal in batch {
            let Some(tx_hash) = withdrawal.tx_hash.clone() else {
                continue;
            };

            let info = match adapter.get_transaction(&tx_hash).await {
                Ok(Some(info)) => info,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(uuid = %withdrawal.uuid, "Confirmation lookup failed: {e}");
                    continue;
                }
            };

            match info.status {
                TxStatus::Failed => self.finalize_failed(&withdrawal).await?,
                _ if info.confirmations >= required => {
                    self.finalize_completed(&withdrawal, info.confirmations, info.block_number)
                        .await?
                }
                _ => {
                    let withdrawal_id = withdrawal.id;
                    let confirmations = info.confirmations as i32;
                    let block_number = info.block_number as i64;
                    with_conn(&self.pool, move |conn| {
                        Withdrawal::update_confirmation(
                            conn,
                            withdrawal_id,
                            confirmations,
                            block_number,
                            WithdrawalStatus::Confirming,
                        )
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Chain reported failure: terminal Failed plus release of the frozen
    /// amount, atomically.
    async fn finalize_failed(&self, withdrawal: &Withdrawal) -> WalletResult<()> {
        let snapshot = withdrawal.clone();
        let changed = with_conn(&self.pool, move |conn| {
            conn.immediate_transaction(|conn| {
                let Some(current) = Withdrawal::find_by_id(conn, snapshot.id)? else {
                    return Ok(false);
                };
                if current.status().is_terminal() {
                    return Ok(false);
                }
                Withdrawal::mark_failed(conn, snapshot.id, "transaction failed on chain")?;
                Balance::unfreeze_within(
                    conn,
                    snapshot.user_id,
                    &snapshot.chain,
                    &snapshot.currency,
                    &snapshot.amount,
                )?;
                Ok(true)
            })
        })
        .await?;

        if changed {
            tracing::warn!(uuid = %withdrawal.uuid, "Withdrawal failed on chain, funds released");
            self.audit.log_async(NewAuditLog::failure(
                withdrawal.user_id,
                module::WITHDRAWAL,
                action::FAIL,
                &withdrawal.uuid,
                "transaction failed on chain".to_string(),
            ));
            self.audit.log_async(NewAuditLog::success(
                withdrawal.user_id,
                module::LEDGER,
                action::UNFREEZE,
                &withdrawal.uuid,
                format!("{} {} released", withdrawal.amount, withdrawal.currency),
            ));
            self.events.publish(WalletEvent::WithdrawalFailed {
                user_id: withdrawal.user_id,
                uuid: withdrawal.uuid.clone(),
                reason: "transaction failed on chain".to_string(),
            });
            let notice = self
                .notifier
                .enqueue(
                    withdrawal.user_id,
                    NotificationKind::WithdrawalFailed,
                    "Withdrawal failed".to_string(),
                    format!("Withdrawal {} failed on chain", withdrawal.uuid),
                )
                .await;
            if let Err(e) = notice {
                tracing::warn!("Failed to enqueue failure notification: {e}");
            }
        }
        Ok(())
    }

    /// Confirmed at threshold: debit the frozen amount and complete, in one
    /// transaction. A repeated tick on a Completed row is a no-op.
    async fn finalize_completed(
        &self,
        withdrawal: &Withdrawal,
        confirmations: u32,
        block_number: u64,
    ) -> WalletResult<()> {
        let snapshot = withdrawal.clone();
        let changed = with_conn(&self.pool, move |conn| {
            conn.immediate_transaction(|conn| {
                let Some(current) = Withdrawal::find_by_id(conn, snapshot.id)? else {
                    return Ok(false);
                };
                if current.status().is_terminal() {
                    return Ok(false);
                }
                Balance::debit_frozen_within(
                    conn,
                    snapshot.user_id,
                    &snapshot.chain,
                    &snapshot.currency,
                    &snapshot.amount,
                )?;
                Withdrawal::mark_completed(
                    conn,
                    snapshot.id,
                    confirmations as i32,
                    block_number as i64,
                )?;
                Ok(true)
            })
        })
        .await?;

        if changed {
            tracing::info!(uuid = %withdrawal.uuid, "Withdrawal completed");
            self.audit.log_async(NewAuditLog::success(
                withdrawal.user_id,
                module::WITHDRAWAL,
                action::COMPLETE,
                &withdrawal.uuid,
                String::new(),
            ));
            self.events.publish(WalletEvent::WithdrawalCompleted {
                user_id: withdrawal.user_id,
                uuid: withdrawal.uuid.clone(),
            });
            let notice = self
                .notifier
                .enqueue(
                    withdrawal.user_id,
                    NotificationKind::WithdrawalCompleted,
                    "Withdrawal completed".to_string(),
                    format!(
                        "{} {} sent to {}",
                        withdrawal.amount, withdrawal.currency, withdrawal.to_address
                    ),
                )
                .await;
            if let Err(e) = notice {
                tracing::warn!("Failed to enqueue completion notification: {e}");
            }
        }
        Ok(())
    }

    pub async fn get_by_id(&self, withdrawal_id: i64) -> WalletResult<Withdrawal> {
        with_conn(&self.pool, move |conn| Withdrawal::find_by_id(conn, withdrawal_id))
            .await?
            .ok_or(WalletError::NotFound("withdrawal"))
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> WalletResult<Withdrawal> {
        let uuid = uuid.to_string();
        with_conn(&self.pool, move |conn| Withdrawal::find_by_uuid(conn, &uuid))
            .await?
            .ok_or(WalletError::NotFound("withdrawal"))
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> WalletResult<(Vec<Withdrawal>, i64)> {
        with_conn(&self.pool, move |conn| {
            Withdrawal::list_by_user(conn, user_id, page, page_size)
        })
        .await
    }

    pub async fn set_limit(&self, limit: NewWithdrawalLimit) -> WalletResult<()> {
        with_conn(&self.pool, move |conn| WithdrawalLimit::upsert(conn, limit)).await
    }

    pub async fn get_limit(
        &self,
        user_id: i64,
        chain: &str,
        currency: &str,
    ) -> WalletResult<Option<WithdrawalLimit>> {
        let chain = chain.to_string();
        let currency = currency.to_string();
        with_conn(&self.pool, move |conn| {
            WithdrawalLimit::effective(conn, user_id, &chain, &currency)
        })
        .await
    }
}

fn decimal_field(field: &Option<String>) -> WalletResult<Option<Decimal>> {
    match field {
        Some(s) if !s.is_empty() => Ok(Some(parse_amount(s)?)),
        _ => Ok(None),
    }
}
