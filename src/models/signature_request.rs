//! Signature request rows: the forensic link between a withdrawal and the
//! signing event that produced its transaction.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::models::now;
use crate::schema::signature_requests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignStatus {
    Pending,
    Signed,
    Failed,
    Rejected,
}

impl SignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignStatus::Pending => "pending",
            SignStatus::Signed => "signed",
            SignStatus::Failed => "failed",
            SignStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "signed" => SignStatus::Signed,
            "failed" => SignStatus::Failed,
            "rejected" => SignStatus::Rejected,
            _ => SignStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = signature_requests)]
pub struct SignatureRequest {
    pub id: i64,
    pub request_id: String,
    pub user_id: i64,
    pub key_id: i64,
    pub chain: String,
    pub raw_tx: String,
    pub signed_tx: Option<String>,
    pub status: String,
    pub error_msg: Option<String>,
    pub requested_at: NaiveDateTime,
    pub signed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = signature_requests)]
pub struct NewSignatureRequest {
    pub request_id: String,
    pub user_id: i64,
    pub key_id: i64,
    pub chain: String,
    pub raw_tx: String,
    pub status: String,
}

impl SignatureRequest {
    /// Insert a Pending request. Signing must not happen before this row
    /// exists.
    pub fn create_pending(
        conn: &mut SqliteConnection,
        request_id: &str,
        user_id: i64,
        key_id: i64,
        chain: &str,
        raw_tx_hex: &str,
    ) -> WalletResult<SignatureRequest> {
        let new_request = NewSignatureRequest {
            request_id: request_id.to_string(),
            user_id,
            key_id,
            chain: chain.to_string(),
            raw_tx: raw_tx_hex.to_string(),
            status: SignStatus::Pending.as_str().to_string(),
        };
        diesel::insert_into(signature_requests::table)
            .values(&new_request)
            .execute(conn)?;

        let request = signature_requests::table
            .filter(signature_requests::request_id.eq(request_id))
            .first(conn)?;
        Ok(request)
    }

    pub fn find_by_request_id(
        conn: &mut SqliteConnection,
        request_id: &str,
    ) -> WalletResult<Option<SignatureRequest>> {
        let request = signature_requests::table
            .filter(signature_requests::request_id.eq(request_id))
            .first(conn)
            .optional()?;
        Ok(request)
    }

    pub fn mark_signed(
        conn: &mut SqliteConnection,
        request_id: &str,
        signed_tx_hex: &str,
    ) -> WalletResult<()> {
        diesel::update(
            signature_requests::table.filter(signature_requests::request_id.eq(request_id)),
        )
        .set((
            signature_requests::status.eq(SignStatus::Signed.as_str()),
            signature_requests::signed_tx.eq(signed_tx_hex),
            signature_requests::signed_at.eq(now()),
        ))
        .execute(conn)?;
        Ok(())
    }

    pub fn mark_failed(
        conn: &mut SqliteConnection,
        request_id: &str,
        error_msg: &str,
    ) -> WalletResult<()> {
        diesel::update(
            signature_requests::table.filter(signature_requests::request_id.eq(request_id)),
        )
        .set((
            signature_requests::status.eq(SignStatus::Failed.as_str()),
            signature_requests::error_msg.eq(error_msg),
        ))
        .execute(conn)?;
        Ok(())
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        limit: i64,
    ) -> WalletResult<Vec<SignatureRequest>> {
        let rows = signature_requests::table
            .filter(signature_requests::user_id.eq(user_id))
            .order(signature_requests::requested_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn status(&self) -> SignStatus {
        SignStatus::parse(&self.status)
    }
}
