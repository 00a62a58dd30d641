//! Cooperative scheduler for the background drivers.
//!
//! Four drivers on independent periods, each an owned tokio task. A driver
//! awaits its own work inside the loop, so an invocation can never overlap
//! itself. Cancellation is cooperative: on shutdown each driver finishes the
//! chain it is working on and exits.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerSettings;
use crate::services::deposit_pipeline::DepositPipeline;
use crate::services::events::Notifier;
use crate::services::withdrawal_pipeline::WithdrawalPipeline;

const NOTIFICATION_BATCH: i64 = 50;

pub struct Scheduler {
    deposits: Arc<DepositPipeline>,
    withdrawals: Arc<WithdrawalPipeline>,
    notifier: Notifier,
    settings: SchedulerSettings,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        deposits: Arc<DepositPipeline>,
        withdrawals: Arc<WithdrawalPipeline>,
        notifier: Notifier,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            deposits,
            withdrawals,
            notifier,
            settings,
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn all drivers. Call once.
    pub fn start(&mut self) {
        tracing::info!(
            scan = ?self.settings.deposit_scan_interval,
            confirm = ?self.settings.confirmation_interval,
            withdraw = ?self.settings.withdrawal_interval,
            notify = ?self.settings.notification_interval,
            "Scheduler starting"
        );

        self.handles.push(self.spawn_deposit_scanner());
        self.handles.push(self.spawn_confirmation_checker());
        self.handles.push(self.spawn_withdrawal_processor());
        self.handles.push(self.spawn_notification_dispatcher());
    }

    /// Cancel all drivers and wait for them to finish their current work
    pub async fn shutdown(mut self) {
        tracing::info!("Scheduler shutting down");
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn_deposit_scanner(&self) -> JoinHandle<()> {
        let deposits = self.deposits.clone();
        let token = self.shutdown.clone();
        let period = self.settings.deposit_scan_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return,
                }
                for chain in deposits.chains() {
                    if token.is_cancelled() {
                        return;
                    }
                    if let Err(e) = deposits.scan_deposits(&chain).await {
                        tracing::error!(%chain, "Deposit scan failed: {e}");
                    }
                    if let Err(e) = deposits.process_sweep_tasks(&chain).await {
                        tracing::error!(%chain, "Sweep processing failed: {e}");
                    }
                }
            }
        })
    }

    fn spawn_confirmation_checker(&self) -> JoinHandle<()> {
        let deposits = self.deposits.clone();
        let withdrawals = self.withdrawals.clone();
        let token = self.shutdown.clone();
        let period = self.settings.confirmation_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return,
                }
                for chain in deposits.chains() {
                    if token.is_cancelled() {
                        return;
                    }
                    if let Err(e) = deposits.check_confirmations(&chain).await {
                        tracing::error!(%chain, "Deposit confirmation check failed: {e}");
                    }
                    if let Err(e) = deposits.process_credits().await {
                        tracing::error!(%chain, "Credit processing failed: {e}");
                    }
                    if let Err(e) = withdrawals.check_confirmations(&chain).await {
                        tracing::error!(%chain, "Withdrawal confirmation check failed: {e}");
                    }
                }
            }
        })
    }

    fn spawn_withdrawal_processor(&self) -> JoinHandle<()> {
        let withdrawals = self.withdrawals.clone();
        let token = self.shutdown.clone();
        let period = self.settings.withdrawal_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return,
                }
                if let Err(e) = withdrawals.process_approved().await {
                    tracing::error!("Withdrawal processing failed: {e}");
                }
            }
        })
    }

    fn spawn_notification_dispatcher(&self) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let token = self.shutdown.clone();
        let period = self.settings.notification_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return,
                }
                if let Err(e) = notifier.dispatch_pending(NOTIFICATION_BATCH).await {
                    tracing::error!("Notification dispatch failed: {e}");
                }
            }
        })
    }
}
