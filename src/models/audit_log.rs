//! Append-only audit trail.
//!
//! Every key-bearing action and state transition lands here. Rows are never
//! updated or deleted.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::schema::audit_logs;

pub mod module {
    pub const KEY_MANAGER: &str = "key_manager";
    pub const WALLET: &str = "wallet";
    pub const DEPOSIT: &str = "deposit";
    pub const WITHDRAWAL: &str = "withdrawal";
    pub const RISK: &str = "risk";
    pub const LEDGER: &str = "ledger";
}

pub mod action {
    pub const CREATE: &str = "create";
    pub const SIGN: &str = "sign";
    pub const CREDIT: &str = "credit";
    pub const FREEZE: &str = "freeze";
    pub const UNFREEZE: &str = "unfreeze";
    pub const APPROVE: &str = "approve";
    pub const REJECT: &str = "reject";
    pub const CANCEL: &str = "cancel";
    pub const BROADCAST: &str = "broadcast";
    pub const COMPLETE: &str = "complete";
    pub const FAIL: &str = "fail";
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    pub id: i64,
    pub user_id: i64,
    pub module: String,
    pub action: String,
    pub resource_id: String,
    pub description: String,
    pub status: String,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub user_id: i64,
    pub module: String,
    pub action: String,
    pub resource_id: String,
    pub description: String,
    pub status: String,
    pub error_msg: Option<String>,
}

impl NewAuditLog {
    pub fn success(
        user_id: i64,
        module: &str,
        action: &str,
        resource_id: &str,
        description: String,
    ) -> Self {
        Self {
            user_id,
            module: module.to_string(),
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            description,
            status: "success".to_string(),
            error_msg: None,
        }
    }

    pub fn failure(
        user_id: i64,
        module: &str,
        action: &str,
        resource_id: &str,
        error_msg: String,
    ) -> Self {
        Self {
            user_id,
            module: module.to_string(),
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            description: String::new(),
            status: "failed".to_string(),
            error_msg: Some(error_msg),
        }
    }
}

impl AuditLog {
    pub fn create(conn: &mut SqliteConnection, entry: NewAuditLog) -> WalletResult<()> {
        diesel::insert_into(audit_logs::table).values(&entry).execute(conn)?;
        Ok(())
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        limit: i64,
    ) -> WalletResult<Vec<AuditLog>> {
        let rows = audit_logs::table
            .filter(audit_logs::user_id.eq(user_id))
            .order(audit_logs::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn list_by_module(
        conn: &mut SqliteConnection,
        module: &str,
        limit: i64,
    ) -> WalletResult<Vec<AuditLog>> {
        let rows = audit_logs::table
            .filter(audit_logs::module.eq(module))
            .order(audit_logs::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }
}
