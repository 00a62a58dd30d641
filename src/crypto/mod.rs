//! Cryptographic primitives for the key manager.
//!
//! Nothing in this module touches the database; the key manager composes
//! these pieces and owns the only in-memory copy of the KEK.

pub mod address;
pub mod hd;
pub mod kek;

pub use hd::{coin_type, derivation_path, HdKey};
pub use kek::Kek;
