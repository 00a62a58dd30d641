//! Append-only audit sink.
//!
//! Critical paths call [`AuditSink::log`] and propagate failure; state
//! transitions that must not block on auditing use the fire-and-forget
//! variant, which logs its own errors.

use crate::db::{with_conn, DbPool};
use crate::error::WalletResult;
use crate::models::audit_log::{AuditLog, NewAuditLog};

#[derive(Clone)]
pub struct AuditSink {
    pool: DbPool,
}

impl AuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an entry, surfacing any failure to the caller
    pub async fn log(&self, entry: NewAuditLog) -> WalletResult<()> {
        with_conn(&self.pool, move |conn| AuditLog::create(conn, entry)).await
    }

    /// Append an entry without waiting on the write
    pub fn log_async(&self, entry: NewAuditLog) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = with_conn(&pool, move |conn| AuditLog::create(conn, entry)).await;
            if let Err(e) = result {
                tracing::error!("Failed to append audit entry: {e}");
            }
        });
    }

    pub async fn user_trail(&self, user_id: i64, limit: i64) -> WalletResult<Vec<AuditLog>> {
        with_conn(&self.pool, move |conn| AuditLog::list_by_user(conn, user_id, limit)).await
    }

    pub async fn module_trail(&self, module: &str, limit: i64) -> WalletResult<Vec<AuditLog>> {
        let module = module.to_string();
        with_conn(&self.pool, move |conn| AuditLog::list_by_module(conn, &module, limit)).await
    }
}
