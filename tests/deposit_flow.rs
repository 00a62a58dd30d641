//! End-to-end deposit scenarios: scan → confirm → credit, idempotency and
//! scanner crash recovery.

mod support;

use custodia::models::deposit::{Deposit, DepositStatus, ScanProgress, SweepTask};
use rust_decimal::Decimal;
use support::{TestHarness, CHAIN, CONFIRMATIONS};

const WEI_1_5: &str = "1500000000000000000";

#[tokio::test]
async fn deposit_happy_path_credits_balance() {
    let harness = TestHarness::new().await;

    // user 1 gets a deposit address on ethereum
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    // block 101 carries 1.5 ETH to that address; tip gives exactly the
    // required confirmations
    harness.adapter.add_block(101, vec!["0xdep1"]);
    harness.adapter.add_transfer("0xdep1", "0xsender", &address, WEI_1_5, 101);
    harness.adapter.set_tip(101 + CONFIRMATIONS as u64 - 1);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();
    harness.confirmation_tick().await;

    let conn = &mut harness.pool.get().unwrap();
    let deposit = Deposit::find_by_chain_tx(conn, CHAIN, "0xdep1").unwrap().unwrap();
    assert_eq!(deposit.status(), DepositStatus::Credited);
    assert!(deposit.credited);
    assert_eq!(deposit.amount, WEI_1_5);

    let balance = harness.ledger.read(1, CHAIN, "ETH").await.unwrap();
    assert_eq!(balance.available, WEI_1_5.parse::<Decimal>().unwrap());
    assert_eq!(balance.frozen, Decimal::ZERO);
}

#[tokio::test]
async fn deposit_below_threshold_stays_confirming() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    harness.adapter.add_block(50, vec!["0xslow"]);
    harness.adapter.add_transfer("0xslow", "0xsender", &address, "1000", 50);
    // one short of the threshold
    harness.adapter.set_tip(50 + CONFIRMATIONS as u64 - 2);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();
    harness.confirmation_tick().await;

    let conn = &mut harness.pool.get().unwrap();
    let deposit = Deposit::find_by_chain_tx(conn, CHAIN, "0xslow").unwrap().unwrap();
    assert_eq!(deposit.status(), DepositStatus::Confirming);
    assert!(!deposit.credited);

    let balance = harness.ledger.read(1, CHAIN, "ETH").await.unwrap();
    assert_eq!(balance.available, Decimal::ZERO);

    // one more block pushes it over the line
    harness.adapter.set_tip(50 + CONFIRMATIONS as u64 - 1);
    harness.confirmation_tick().await;

    let conn = &mut harness.pool.get().unwrap();
    let deposit = Deposit::find_by_chain_tx(conn, CHAIN, "0xslow").unwrap().unwrap();
    assert_eq!(deposit.status(), DepositStatus::Credited);
}

#[tokio::test]
async fn double_send_is_idempotent() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    // the same tx hash injected twice
    for _ in 0..2 {
        harness
            .deposits
            .process_deposit(CHAIN, "0xdup", "0xsender", &address, "ETH", "500", 10)
            .await
            .unwrap();
    }

    let conn = &mut harness.pool.get().unwrap();
    let (rows, total) = Deposit::list_by_user(conn, 1, 1, 100).unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows.len(), 1);

    // confirm and credit repeatedly: exactly one credit lands
    harness.adapter.add_transfer("0xdup", "0xsender", &address, "500", 10);
    harness.adapter.set_tip(10 + CONFIRMATIONS as u64);
    for _ in 0..3 {
        harness.confirmation_tick().await;
    }

    let balance = harness.ledger.read(1, CHAIN, "ETH").await.unwrap();
    assert_eq!(balance.available, Decimal::from(500));
}

#[tokio::test]
async fn repeated_confirmation_ticks_converge() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    harness.adapter.add_block(7, vec!["0xconv"]);
    harness.adapter.add_transfer("0xconv", "0xsender", &address, "42", 7);
    harness.adapter.set_tip(7 + CONFIRMATIONS as u64);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();

    // N applications of the confirmation driver equal one application
    harness.confirmation_tick().await;
    let conn = &mut harness.pool.get().unwrap();
    let after_one = Deposit::find_by_chain_tx(conn, CHAIN, "0xconv").unwrap().unwrap();

    for _ in 0..4 {
        harness.confirmation_tick().await;
    }
    let conn = &mut harness.pool.get().unwrap();
    let after_many = Deposit::find_by_chain_tx(conn, CHAIN, "0xconv").unwrap().unwrap();

    assert_eq!(after_one.status(), after_many.status());
    assert_eq!(after_one.credited, after_many.credited);
    let balance = harness.ledger.read(1, CHAIN, "ETH").await.unwrap();
    assert_eq!(balance.available, Decimal::from(42));
}

#[tokio::test]
async fn scanner_resumes_after_crash_without_double_credit() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    // checkpoint sits at 100; block 101 holds the relevant tx
    {
        let conn = &mut harness.pool.get().unwrap();
        ScanProgress::set(conn, CHAIN, 100).unwrap();
    }
    harness.adapter.add_block(101, vec!["0xcrash"]);
    harness.adapter.add_transfer("0xcrash", "0xsender", &address, "900", 101);
    harness.adapter.set_tip(101);

    // crash before the progress write: the deposit lands but the
    // checkpoint does not move
    harness
        .deposits
        .process_deposit(CHAIN, "0xcrash", "0xsender", &address, "ETH", "900", 101)
        .await
        .unwrap();
    {
        let conn = &mut harness.pool.get().unwrap();
        assert_eq!(ScanProgress::get(conn, CHAIN).unwrap(), 100);
    }

    // restart: the scanner re-processes block 101 exactly once
    harness.deposits.scan_deposits(CHAIN).await.unwrap();

    let conn = &mut harness.pool.get().unwrap();
    assert_eq!(ScanProgress::get(conn, CHAIN).unwrap(), 101);
    let (_, total) = Deposit::list_by_user(conn, 1, 1, 100).unwrap();
    assert_eq!(total, 1);

    harness.adapter.set_tip(101 + CONFIRMATIONS as u64);
    harness.confirmation_tick().await;
    let balance = harness.ledger.read(1, CHAIN, "ETH").await.unwrap();
    assert_eq!(balance.available, Decimal::from(900));
}

#[tokio::test]
async fn failed_block_fetch_does_not_advance_progress() {
    let harness = TestHarness::new().await;
    harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap();

    harness.adapter.add_block(1, vec![]);
    harness.adapter.add_block(2, vec![]);
    harness.adapter.fail_block(2);
    harness.adapter.set_tip(3);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();

    // block 1 processed, block 2 aborted the tick
    let conn = &mut harness.pool.get().unwrap();
    assert_eq!(ScanProgress::get(conn, CHAIN).unwrap(), 1);

    // node recovers, next tick finishes the window
    harness.adapter.clear_block_failures();
    harness.adapter.add_block(3, vec![]);
    harness.deposits.scan_deposits(CHAIN).await.unwrap();
    let conn = &mut harness.pool.get().unwrap();
    assert_eq!(ScanProgress::get(conn, CHAIN).unwrap(), 3);
}

#[tokio::test]
async fn unknown_destination_is_ignored() {
    let harness = TestHarness::new().await;
    harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap();

    harness
        .deposits
        .process_deposit(CHAIN, "0xother", "0xsender", "0xnobody", "ETH", "100", 5)
        .await
        .unwrap();

    let conn = &mut harness.pool.get().unwrap();
    assert!(Deposit::find_by_chain_tx(conn, CHAIN, "0xother").unwrap().is_none());
}

#[tokio::test]
async fn credited_deposit_queues_sweep_task() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    harness.adapter.add_block(20, vec!["0xsweep"]);
    harness.adapter.add_transfer("0xsweep", "0xsender", &address, "777", 20);
    harness.adapter.set_tip(20 + CONFIRMATIONS as u64);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();
    harness.confirmation_tick().await;

    let conn = &mut harness.pool.get().unwrap();
    let tasks = SweepTask::list_pending(conn, CHAIN, 10).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].from_address, address);
    assert_eq!(tasks[0].to_address, harness.hot_wallet);
    assert_eq!(tasks[0].amount, "777");

    let deposit = Deposit::find_by_chain_tx(conn, CHAIN, "0xsweep").unwrap().unwrap();
    assert!(deposit.swept);
}

#[tokio::test]
async fn sweep_task_is_signed_and_broadcast() {
    let harness = TestHarness::new().await;
    let address = harness
        .deposits
        .allocate_deposit_address(1, CHAIN)
        .await
        .unwrap()
        .address;

    harness.adapter.add_block(30, vec!["0xfund"]);
    harness.adapter.add_transfer("0xfund", "0xsender", &address, "888", 30);
    harness.adapter.set_tip(30 + CONFIRMATIONS as u64);

    harness.deposits.scan_deposits(CHAIN).await.unwrap();
    harness.confirmation_tick().await;
    harness.deposits.process_sweep_tasks(CHAIN).await.unwrap();

    assert_eq!(harness.adapter.broadcasts().len(), 1);
    let conn = &mut harness.pool.get().unwrap();
    assert!(SweepTask::list_pending(conn, CHAIN, 10).unwrap().is_empty());
}
