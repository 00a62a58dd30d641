//! Service layer: the intake surface and the background pipelines.
//!
//! Services are constructed once in the binary and injected where needed;
//! none of them reaches back into the scheduler.

pub mod audit;
pub mod deposit_pipeline;
pub mod events;
pub mod key_manager;
pub mod ledger;
pub mod risk_engine;
pub mod scheduler;
pub mod wallet;
pub mod withdrawal_pipeline;

pub use audit::AuditSink;
pub use deposit_pipeline::DepositPipeline;
pub use events::{EventBus, Notifier, WalletEvent};
pub use key_manager::KeyManager;
pub use ledger::Ledger;
pub use risk_engine::RiskEngine;
pub use scheduler::Scheduler;
pub use wallet::WalletService;
pub use withdrawal_pipeline::WithdrawalPipeline;
