//! Persistent notification records drained by the dispatcher driver.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::models::now;
use crate::schema::notifications;

/// Delivery attempts before a notification is abandoned
pub const MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DepositCredited,
    WithdrawalCompleted,
    WithdrawalFailed,
    WithdrawalReview,
    SecurityAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DepositCredited => "deposit_credited",
            NotificationKind::WithdrawalCompleted => "withdrawal_completed",
            NotificationKind::WithdrawalFailed => "withdrawal_failed",
            NotificationKind::WithdrawalReview => "withdrawal_review",
            NotificationKind::SecurityAlert => "security_alert",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub sent_at: Option<NaiveDateTime>,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: i64, kind: NotificationKind, title: String, body: String) -> Self {
        Self {
            user_id,
            kind: kind.as_str().to_string(),
            title,
            body,
            data: None,
        }
    }
}

impl Notification {
    pub fn create(conn: &mut SqliteConnection, notification: NewNotification) -> WalletResult<()> {
        diesel::insert_into(notifications::table)
            .values(&notification)
            .execute(conn)?;
        Ok(())
    }

    /// Pending notifications still under the retry cap, oldest first
    pub fn list_pending(conn: &mut SqliteConnection, limit: i64) -> WalletResult<Vec<Notification>> {
        let rows = notifications::table
            .filter(notifications::status.eq("pending"))
            .filter(notifications::retry_count.lt(MAX_RETRIES))
            .order(notifications::created_at.asc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }

    pub fn mark_sent(conn: &mut SqliteConnection, notification_id: i64) -> WalletResult<()> {
        diesel::update(notifications::table.find(notification_id))
            .set((
                notifications::status.eq("sent"),
                notifications::sent_at.eq(now()),
                notifications::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Bump the retry counter; the row flips to failed at the cap
    pub fn mark_attempt_failed(
        conn: &mut SqliteConnection,
        notification_id: i64,
        retry_count: i32,
        error_msg: &str,
    ) -> WalletResult<()> {
        let next = retry_count + 1;
        let status = if next >= MAX_RETRIES { "failed" } else { "pending" };
        diesel::update(notifications::table.find(notification_id))
            .set((
                notifications::status.eq(status),
                notifications::retry_count.eq(next),
                notifications::error_msg.eq(error_msg),
                notifications::updated_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    pub fn list_by_user(
        conn: &mut SqliteConnection,
        user_id: i64,
        limit: i64,
    ) -> WalletResult<Vec<Notification>> {
        let rows = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .limit(limit)
            .load(conn)?;
        Ok(rows)
    }
}
