//! Record types and row operations.
//!
//! Each model owns its queries; callers hand in a pooled connection. Status
//! columns are TEXT backed by Rust enums with `as_str`/`parse` pairs.

pub mod audit_log;
pub mod balance;
pub mod deposit;
pub mod encrypted_key;
pub mod notification;
pub mod risk;
pub mod signature_request;
pub mod user;
pub mod wallet;
pub mod withdrawal;

/// Current UTC timestamp in the naive form diesel stores
pub(crate) fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}
