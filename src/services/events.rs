//! Typed event bus and notification records.
//!
//! Events are best-effort: subscribers that lag or disappear never block a
//! pipeline. Durable user-facing notices additionally land in the
//! `notifications` table and are drained by the dispatcher driver.

use tokio::sync::broadcast;

use crate::db::{with_conn, DbPool};
use crate::error::WalletResult;
use crate::models::notification::{NewNotification, Notification, NotificationKind};

const BUS_CAPACITY: usize = 256;

/// Everything interesting that happens to a user's funds
#[derive(Debug, Clone)]
pub enum WalletEvent {
    DepositDetected { user_id: i64, chain: String, tx_hash: String, amount: String },
    DepositCredited { user_id: i64, chain: String, currency: String, amount: String },
    WithdrawalCreated { user_id: i64, uuid: String, status: String },
    WithdrawalBroadcast { user_id: i64, uuid: String, tx_hash: String },
    WithdrawalCompleted { user_id: i64, uuid: String },
    WithdrawalFailed { user_id: i64, uuid: String, reason: String },
}

/// Best-effort broadcast of typed events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WalletEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish to whoever is listening; no subscribers is not an error
    pub fn publish(&self, event: WalletEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.sender.subscribe()
    }
}

/// Durable notification records plus their periodic dispatch
#[derive(Clone)]
pub struct Notifier {
    pool: DbPool,
}

impl Notifier {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Queue a notification for the dispatcher
    pub async fn enqueue(
        &self,
        user_id: i64,
        kind: NotificationKind,
        title: String,
        body: String,
    ) -> WalletResult<()> {
        let record = NewNotification::new(user_id, kind, title, body);
        with_conn(&self.pool, move |conn| Notification::create(conn, record)).await
    }

    /// Drain pending notifications once; called by the dispatcher driver.
    ///
    /// Actual delivery channels (mail, webhooks) are external collaborators;
    /// this marks records as handed over and tracks retry exhaustion.
    pub async fn dispatch_pending(&self, limit: i64) -> WalletResult<usize> {
        let pending =
            with_conn(&self.pool, move |conn| Notification::list_pending(conn, limit)).await?;
        let count = pending.len();

        for notification in pending {
            match self.deliver(&notification).await {
                Ok(()) => {
                    with_conn(&self.pool, move |conn| {
                        Notification::mark_sent(conn, notification.id)
                    })
                    .await?;
                }
                Err(e) => {
                    tracing::warn!(
                        notification_id = notification.id,
                        "Notification delivery failed: {e}"
                    );
                    let message = e.to_string();
                    with_conn(&self.pool, move |conn| {
                        Notification::mark_attempt_failed(
                            conn,
                            notification.id,
                            notification.retry_count,
                            &message,
                        )
                    })
                    .await?;
                }
            }
        }

        Ok(count)
    }

    async fn deliver(&self, notification: &Notification) -> WalletResult<()> {
        // Hand-off point for a real delivery channel
        tracing::info!(
            user_id = notification.user_id,
            kind = %notification.kind,
            "Dispatching notification: {}",
            notification.title
        );
        Ok(())
    }
}
