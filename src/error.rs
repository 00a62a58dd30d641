//! Crate-wide error taxonomy.
//!
//! Business-rule failures are values, not panics. Pipelines use the
//! transient/terminal split to decide between retrying on the next tick and
//! moving a row to a failed state.

use thiserror::Error;

/// Errors surfaced by the custodial core
#[derive(Error, Debug)]
pub enum WalletError {
    /// Entity lookup came up empty
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness violated (duplicate key, duplicate tx hash)
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// Caller is not authenticated for this operation
    #[error("unauthorized")]
    Unauthorized,

    /// Caller is authenticated but does not own the resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed or out-of-range input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Ledger guard failed (available or frozen below requested amount)
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Single or daily withdrawal limit exceeded
    #[error("exceed {0} limit")]
    ExceedLimit(&'static str),

    /// Amount below the configured minimum
    #[error("below minimum amount")]
    BelowMin,

    /// Risk engine blocked the operation
    #[error("blocked by risk control: {0}")]
    Blocked(String),

    /// Optimistic-lock or state-machine conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Chain capability not implemented by this adapter
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Retryable upstream failure (network, rate limit, transient node error)
    #[error("transient chain error: {0}")]
    Transient(String),

    /// Non-retryable upstream failure (malformed payload, double-spend, bad nonce)
    #[error("terminal chain error: {0}")]
    Terminal(String),

    /// AEAD open failed: wrong KEK or corrupted ciphertext
    #[error("decryption failed")]
    DecryptionFailed,

    /// ECDSA signing failed
    #[error("signature failed: {0}")]
    SignatureFailed(String),

    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Connection pool exhausted or unavailable
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Anything else that should unwind to the operator
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Retry at the next tick rather than failing the affected row
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletError::Transient(_) | WalletError::Pool(_) | WalletError::Conflict(_)
        )
    }

    /// Stop the current operation and record a terminal failure
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WalletError::Terminal(_)
                | WalletError::Unsupported(_)
                | WalletError::InvalidArgument(_)
        )
    }

    /// Stable machine-readable code for the intake surface
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::NotFound(_) => "not_found",
            WalletError::AlreadyExists(_) => "already_exists",
            WalletError::Unauthorized => "unauthorized",
            WalletError::Forbidden(_) => "forbidden",
            WalletError::InvalidArgument(_) => "invalid_argument",
            WalletError::InsufficientBalance => "insufficient_balance",
            WalletError::ExceedLimit("single") => "exceed_single_limit",
            WalletError::ExceedLimit("daily") => "exceed_daily_limit",
            WalletError::ExceedLimit(_) => "exceed_limit",
            WalletError::BelowMin => "below_min_amount",
            WalletError::Blocked(_) => "blocked",
            WalletError::Conflict(_) => "conflict",
            WalletError::Unsupported(_) => "unsupported",
            WalletError::Transient(_) => "transient",
            WalletError::Terminal(_) => "terminal",
            WalletError::DecryptionFailed => "decryption_failed",
            WalletError::SignatureFailed(_) => "signature_failed",
            WalletError::Database(_) | WalletError::Pool(_) | WalletError::Internal(_) => {
                "internal"
            }
        }
    }
}

impl From<diesel::r2d2::PoolError> for WalletError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        WalletError::Pool(e.to_string())
    }
}

impl From<tokio::task::JoinError> for WalletError {
    fn from(e: tokio::task::JoinError) -> Self {
        WalletError::Internal(format!("blocking task failed: {e}"))
    }
}

/// Result alias used across the crate
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(WalletError::Transient("rate limited".into()).is_transient());
        assert!(!WalletError::Terminal("nonce too low".into()).is_transient());
        assert!(!WalletError::InsufficientBalance.is_transient());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(WalletError::Terminal("invalid payload".into()).is_terminal());
        assert!(WalletError::Unsupported("get_balance").is_terminal());
        assert!(!WalletError::Transient("timeout".into()).is_terminal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WalletError::InsufficientBalance.code(), "insufficient_balance");
        assert_eq!(WalletError::ExceedLimit("daily").code(), "exceed_daily_limit");
        assert_eq!(WalletError::ExceedLimit("single").code(), "exceed_single_limit");
        assert_eq!(WalletError::BelowMin.code(), "below_min_amount");
    }
}
