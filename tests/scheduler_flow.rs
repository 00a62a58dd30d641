//! Scheduler behavior: drivers tick, cancellation stops them cleanly.

mod support;

use std::time::Duration;

use custodia::config::SchedulerSettings;
use custodia::models::deposit::{Deposit, DepositStatus};
use custodia::services::{Notifier, Scheduler};
use support::{TestHarness, CHAIN, CONFIRMATIONS};

fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        deposit_scan_interval: Duration::from_millis(50),
        confirmation_interval: Duration::from_millis(50),
        withdrawal_interval: Duration::from_millis(50),
        notification_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn scheduler_drives_deposit_to_credited() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    harness.adapter.add_block(10, vec!["0xsched"]);
    harness.adapter.add_transfer("0xsched", "0xsender", &address, "1234", 10);
    harness.adapter.set_tip(10 + CONFIRMATIONS as u64);

    let mut scheduler = Scheduler::new(
        harness.deposits.clone(),
        harness.withdrawals.clone(),
        Notifier::new(harness.pool.clone()),
        fast_settings(),
    );
    scheduler.start();

    // wait for scan + confirm + credit to land, bounded
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        {
            let conn = &mut harness.pool.get().unwrap();
            if let Some(deposit) = Deposit::find_by_chain_tx(conn, CHAIN, "0xsched").unwrap() {
                if deposit.status() == DepositStatus::Credited {
                    break;
                }
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "deposit was not credited within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    scheduler.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_prompt_and_final() {
    let harness = TestHarness::new().await;

    let mut scheduler = Scheduler::new(
        harness.deposits.clone(),
        harness.withdrawals.clone(),
        Notifier::new(harness.pool.clone()),
        fast_settings(),
    );
    scheduler.start();
    let token = scheduler.cancellation_token();

    tokio::time::sleep(Duration::from_millis(120)).await;

    let shutdown = tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown()).await;
    assert!(shutdown.is_ok(), "shutdown must complete promptly");
    assert!(token.is_cancelled());
}
