//! Multi-chain custodial wallet backend.
//!
//! Holds user funds across several blockchains: credits on-chain deposits
//! to internal balances, authorizes and executes outbound transfers through
//! risk review, and keeps a consistent per-user ledger. Transport layers
//! (HTTP/RPC) sit on top of the service layer exported here.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod services;

pub use error::{WalletError, WalletResult};
