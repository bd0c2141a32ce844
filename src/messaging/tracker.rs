/// Message delivery tracking
///
/// One record per relayed message, keyed by message id. The record is
/// written before any relay attempt so a crash during push never loses the
/// message; receipts from the receiver advance the status monotonically and
/// every mutation recomputes the record's expiry.
use crate::directory::{UserDirectory, UserRecord};
use crate::error::{CourierError, CourierResult};
use crate::metrics;
use crate::phone::ledger::parse_timestamp;
use crate::phone::normalize;
use crate::push::{PushPayload, PushRelay};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Maximum message body length in characters
const MAX_BODY_CHARS: usize = 4096;

/// Expiry horizon once both ends have seen the message
const SYNCED_TTL_MINUTES: i64 = 30;

/// Expiry horizon while the message may still need offline catch-up
const PENDING_TTL_HOURS: i64 = 48;

/// Default and maximum page sizes for pending sync
const DEFAULT_SYNC_PAGE: i64 = 100;
const MAX_SYNC_PAGE: i64 = 500;

/// Delivery lifecycle states, ordered by rank. A receipt only applies when
/// its rank is at least the current one, so status never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Failed,
    Accepted,
    Pushed,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::Pushed => "pushed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> CourierResult<Self> {
        match s {
            "failed" => Ok(DeliveryStatus::Failed),
            "accepted" => Ok(DeliveryStatus::Accepted),
            "pushed" => Ok(DeliveryStatus::Pushed),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            _ => Err(CourierError::Internal(format!(
                "Unknown delivery status: {}",
                s
            ))),
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Failed => 0,
            DeliveryStatus::Accepted => 1,
            DeliveryStatus::Pushed => 2,
            DeliveryStatus::Delivered => 3,
            DeliveryStatus::Read => 4,
        }
    }

    /// Expiry horizon for a record in this status. Synced records vanish
    /// quickly; unacknowledged ones linger long enough for offline catch-up.
    pub fn ttl(&self) -> Duration {
        match self {
            DeliveryStatus::Delivered | DeliveryStatus::Read => {
                Duration::minutes(SYNCED_TTL_MINUTES)
            }
            DeliveryStatus::Failed | DeliveryStatus::Accepted | DeliveryStatus::Pushed => {
                Duration::hours(PENDING_TTL_HOURS)
            }
        }
    }
}

/// Delivery record for one relayed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub message_id: String,
    pub conversation_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a send attempt
#[derive(Debug, Clone)]
pub struct SendMessageInput {
    pub conversation_id: String,
    /// Receiver reference: identity, username, or phone number
    pub receiver: String,
    pub body: String,
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Result of a send attempt. Relay failure is not visible here; the message
/// is durably queued either way.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message_id: String,
    pub status: DeliveryStatus,
    /// True when no relay attempt succeeded and the receiver will pick the
    /// message up on next sync
    pub queued: bool,
}

/// Result of a receipt submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptOutcome {
    pub message_id: String,
    pub status: DeliveryStatus,
}

/// Delivery tracker service
#[derive(Clone)]
pub struct DeliveryTracker {
    db: SqlitePool,
    directory: UserDirectory,
    relay: PushRelay,
}

impl DeliveryTracker {
    pub fn new(db: SqlitePool, directory: UserDirectory, relay: PushRelay) -> Self {
        Self {
            db,
            directory,
            relay,
        }
    }

    /// Accept a message for relay.
    ///
    /// The accepted record is persisted before the push attempt, so a crash
    /// during relay leaves a durable queued message rather than nothing.
    pub async fn send_message(&self, sender: &str, input: SendMessageInput) -> CourierResult<SendOutcome> {
        let body = input.body.trim();
        if body.is_empty() {
            return Err(CourierError::Validation(
                "Message body must not be empty".to_string(),
            ));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(CourierError::Validation(format!(
                "Message body exceeds {} characters",
                MAX_BODY_CHARS
            )));
        }
        if input.conversation_id.is_empty() {
            return Err(CourierError::Validation(
                "Conversation id must not be empty".to_string(),
            ));
        }

        let receiver = self.resolve_receiver(&input.receiver).await?;

        if receiver.identity == sender {
            return Err(CourierError::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }

        let message_id = input
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let sent_at = input.sent_at.unwrap_or(now);
        let expires_at = now + DeliveryStatus::Accepted.ttl();

        // Durable accepted record first; retries of the same message id are
        // absorbed without resetting an already-advanced status
        sqlx::query(
            "INSERT INTO message_delivery (message_id, conversation_id, sender, receiver, body, sent_at, status, retry_count, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)
             ON CONFLICT(message_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(&message_id)
        .bind(&input.conversation_id)
        .bind(sender)
        .bind(&receiver.identity)
        .bind(body)
        .bind(sent_at.to_rfc3339())
        .bind(DeliveryStatus::Accepted.as_str())
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        metrics::record_message_sent();

        let push_token = match receiver.push_token {
            Some(ref token) if !token.is_empty() => token.clone(),
            _ => {
                tracing::debug!("Receiver {} has no push token, message queued", receiver.identity);
                return Ok(SendOutcome {
                    message_id,
                    status: DeliveryStatus::Accepted,
                    queued: true,
                });
            }
        };

        let payload = PushPayload::message(&message_id, &input.conversation_id, sender, body);

        match self.relay.send(&push_token, &payload).await {
            Ok(()) => {
                metrics::record_push_attempt(true);
                self.mark_pushed(&message_id).await?;
                Ok(SendOutcome {
                    message_id,
                    status: DeliveryStatus::Pushed,
                    queued: false,
                })
            }
            Err(e) => {
                // Invisible to the sender: the message stays durably queued
                metrics::record_push_attempt(false);
                tracing::warn!("Push relay failed for message {}: {}", message_id, e);
                self.record_relay_failure(&message_id, &e.to_string()).await?;
                Ok(SendOutcome {
                    message_id,
                    status: DeliveryStatus::Accepted,
                    queued: true,
                })
            }
        }
    }

    /// Receiver-submitted delivery receipt. Accepts only delivered or read,
    /// applies the monotonic-advancement rule, and notifies the sender on a
    /// best-effort basis.
    pub async fn submit_receipt(
        &self,
        caller: &str,
        message_id: &str,
        receipt: DeliveryStatus,
    ) -> CourierResult<ReceiptOutcome> {
        if !matches!(receipt, DeliveryStatus::Delivered | DeliveryStatus::Read) {
            return Err(CourierError::Validation(
                "Receipt status must be delivered or read".to_string(),
            ));
        }

        let record = self
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| CourierError::NotFound(format!("Message {} not found", message_id)))?;

        if record.receiver != caller {
            return Err(CourierError::Authorization(
                "Only the message's receiver may submit receipts".to_string(),
            ));
        }

        // Monotonic: a stale receipt leaves the record as it stands
        if receipt.rank() < record.status.rank() {
            return Ok(ReceiptOutcome {
                message_id: record.message_id,
                status: record.status,
            });
        }

        let now = Utc::now();
        let delivered_at = record.delivered_at.unwrap_or(now);
        let read_at = match receipt {
            DeliveryStatus::Read => Some(record.read_at.unwrap_or(now)),
            _ => record.read_at,
        };
        let expires_at = now + receipt.ttl();

        sqlx::query(
            "UPDATE message_delivery
             SET status = ?1, delivered_at = ?2, read_at = ?3, last_error = NULL, expires_at = ?4, updated_at = ?5
             WHERE message_id = ?6",
        )
        .bind(receipt.as_str())
        .bind(delivered_at.to_rfc3339())
        .bind(read_at.map(|dt| dt.to_rfc3339()))
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(message_id)
        .execute(&self.db)
        .await?;

        metrics::record_receipt(receipt.as_str());

        // Fire and forget: the sender learns of the receipt if their device
        // is reachable, and the receipt stands either way
        self.notify_sender(&record, receipt).await;

        Ok(ReceiptOutcome {
            message_id: record.message_id,
            status: receipt,
        })
    }

    /// Pull-based catch-up for a receiver that was offline: non-failed
    /// records in a conversation newer than the cursor, oldest first.
    pub async fn pending_sync(
        &self,
        caller: &str,
        conversation_id: &str,
        since: DateTime<Utc>,
        limit: Option<i64>,
    ) -> CourierResult<Vec<MessageDelivery>> {
        let participants: Vec<&str> = conversation_id.split(':').collect();
        if participants.len() != 2 || participants.iter().any(|p| p.is_empty()) {
            return Err(CourierError::Validation(
                "Malformed conversation id".to_string(),
            ));
        }
        if !participants.contains(&caller) {
            return Err(CourierError::Authorization(
                "Caller is not a participant in this conversation".to_string(),
            ));
        }

        let page = limit.unwrap_or(DEFAULT_SYNC_PAGE).clamp(1, MAX_SYNC_PAGE);

        let rows = sqlx::query(
            "SELECT message_id, conversation_id, sender, receiver, body, sent_at, status, last_error, retry_count, delivered_at, read_at, expires_at, created_at, updated_at
             FROM message_delivery
             WHERE conversation_id = ?1 AND receiver = ?2 AND status != 'failed' AND sent_at > ?3
             ORDER BY sent_at ASC, created_at ASC
             LIMIT ?4",
        )
        .bind(conversation_id)
        .bind(caller)
        .bind(since.to_rfc3339())
        .bind(page)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::parse_delivery).collect()
    }

    /// Remove records whose expiry has passed, regardless of status
    pub async fn purge_expired(&self) -> CourierResult<u64> {
        let result = sqlx::query("DELETE FROM message_delivery WHERE expires_at < ?1")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            metrics::record_expiry_sweep(purged);
        }

        Ok(purged)
    }

    /// Look up a delivery record by message id
    pub async fn find_by_id(&self, message_id: &str) -> CourierResult<Option<MessageDelivery>> {
        let row = sqlx::query(
            "SELECT message_id, conversation_id, sender, receiver, body, sent_at, status, last_error, retry_count, delivered_at, read_at, expires_at, created_at, updated_at
             FROM message_delivery WHERE message_id = ?1",
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::parse_delivery).transpose()
    }

    /// Resolve a receiver reference: identity first, then username, then
    /// phone-suffix match through the normalized lookup key.
    async fn resolve_receiver(&self, reference: &str) -> CourierResult<UserRecord> {
        if reference.is_empty() {
            return Err(CourierError::Validation(
                "Receiver must not be empty".to_string(),
            ));
        }

        if let Some(record) = self.directory.find_by_identity(reference).await? {
            return Ok(record);
        }

        if let Some(record) = self.directory.find_by_username(reference).await? {
            return Ok(record);
        }

        let lookup = normalize::lookup_key(reference);
        if let Some(record) = self.directory.find_by_phone_lookup(&lookup).await? {
            return Ok(record);
        }

        Err(CourierError::NotFound(format!(
            "Receiver {} does not resolve to a known account",
            reference
        )))
    }

    /// Advance to pushed after a successful relay. Guarded on the current
    /// status so a duplicate send cannot regress an acknowledged record.
    async fn mark_pushed(&self, message_id: &str) -> CourierResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE message_delivery SET status = 'pushed', last_error = NULL, expires_at = ?1, updated_at = ?2
             WHERE message_id = ?3 AND status = 'accepted'",
        )
        .bind((now + DeliveryStatus::Pushed.ttl()).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(message_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn record_relay_failure(&self, message_id: &str, error: &str) -> CourierResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE message_delivery SET last_error = ?1, retry_count = retry_count + 1, expires_at = ?2, updated_at = ?3
             WHERE message_id = ?4 AND status = 'accepted'",
        )
        .bind(error)
        .bind((now + DeliveryStatus::Accepted.ttl()).to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(message_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn notify_sender(&self, record: &MessageDelivery, receipt: DeliveryStatus) {
        let sender = match self.directory.find_by_identity(&record.sender).await {
            Ok(Some(sender)) => sender,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Sender lookup failed for receipt relay: {}", e);
                return;
            }
        };

        let token = match sender.push_token {
            Some(ref token) if !token.is_empty() => token.clone(),
            _ => return,
        };

        let payload = PushPayload::receipt(
            &record.message_id,
            &record.conversation_id,
            &record.receiver,
            receipt.as_str(),
        );

        if let Err(e) = self.relay.send(&token, &payload).await {
            tracing::warn!(
                "Receipt relay to sender failed for message {}: {}",
                record.message_id,
                e
            );
        }
    }

    fn parse_delivery(row: &sqlx::sqlite::SqliteRow) -> CourierResult<MessageDelivery> {
        let status_str: String = row.get("status");
        let sent_at_str: String = row.get("sent_at");
        let expires_at_str: String = row.get("expires_at");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        let delivered_at = row
            .try_get::<Option<String>, _>("delivered_at")
            .ok()
            .flatten()
            .map(|s| parse_timestamp(&s))
            .transpose()?;
        let read_at = row
            .try_get::<Option<String>, _>("read_at")
            .ok()
            .flatten()
            .map(|s| parse_timestamp(&s))
            .transpose()?;

        Ok(MessageDelivery {
            message_id: row.get("message_id"),
            conversation_id: row.get("conversation_id"),
            sender: row.get("sender"),
            receiver: row.get("receiver"),
            body: row.get("body"),
            sent_at: parse_timestamp(&sent_at_str)?,
            status: DeliveryStatus::from_str(&status_str)?,
            last_error: row.get("last_error"),
            retry_count: row.get("retry_count"),
            delivered_at,
            read_at,
            expires_at: parse_timestamp(&expires_at_str)?,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Recording backend with a switchable failure mode
    struct MockPush {
        fail: AtomicBool,
        sent: Mutex<Vec<(String, PushPayload)>>,
    }

    impl MockPush {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_payload(&self) -> Option<PushPayload> {
            self.sent.lock().unwrap().last().map(|(_, p)| p.clone())
        }
    }

    #[async_trait]
    impl PushBackend for MockPush {
        async fn send(&self, token: &str, payload: &PushPayload) -> CourierResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CourierError::Push("gateway unavailable".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((token.to_string(), payload.clone()));
            Ok(())
        }
    }

    async fn setup() -> (DeliveryTracker, UserDirectory, Arc<MockPush>, SqlitePool) {
        let db = crate::directory::tests::setup_db().await;

        sqlx::query(
            r#"
            CREATE TABLE message_delivery (
                message_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                body TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                status TEXT NOT NULL,
                last_error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                delivered_at TEXT,
                read_at TEXT,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await
        .unwrap();

        let directory = UserDirectory::new(db.clone());
        directory.ensure_record("user-a").await.unwrap();
        directory.ensure_record("user-b").await.unwrap();

        let backend = MockPush::new();
        let relay = PushRelay::with_backend(backend.clone());
        let tracker = DeliveryTracker::new(db.clone(), directory.clone(), relay);

        (tracker, directory, backend, db)
    }

    fn send_input(receiver: &str) -> SendMessageInput {
        SendMessageInput {
            conversation_id: "user-a:user-b".to_string(),
            receiver: receiver.to_string(),
            body: "hello".to_string(),
            message_id: None,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_send_without_push_token_queues() {
        let (tracker, _, backend, _) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Accepted);
        assert!(outcome.queued);
        assert_eq!(backend.sent_count(), 0);

        let record = tracker.find_by_id(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn test_send_with_token_pushes() {
        let (tracker, directory, backend, _) = setup().await;
        directory.set_push_token("user-b", Some("token-b")).await.unwrap();

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Pushed);
        assert!(!outcome.queued);
        assert_eq!(backend.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_relay_failure_is_invisible_to_sender() {
        let (tracker, directory, backend, _) = setup().await;
        directory.set_push_token("user-b", Some("token-b")).await.unwrap();
        backend.set_fail(true);

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        assert_eq!(outcome.status, DeliveryStatus::Accepted);
        assert!(outcome.queued);

        let record = tracker.find_by_id(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Accepted);
        assert_eq!(record.retry_count, 1);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn test_send_to_self_rejected() {
        let (tracker, _, _, _) = setup().await;

        let err = tracker.send_message("user-a", send_input("user-a")).await.unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_receiver_resolution_by_username_and_phone() {
        let (tracker, directory, _, _) = setup().await;
        directory.set_username("user-b", "bea").await.unwrap();
        directory
            .set_phone("user-b", "+15559876543", "5559876543")
            .await
            .unwrap();

        let by_username = tracker.send_message("user-a", send_input("bea")).await.unwrap();
        let record = tracker.find_by_id(&by_username.message_id).await.unwrap().unwrap();
        assert_eq!(record.receiver, "user-b");

        let by_phone = tracker
            .send_message("user-a", send_input("+1 (555) 987-6543"))
            .await
            .unwrap();
        let record = tracker.find_by_id(&by_phone.message_id).await.unwrap().unwrap();
        assert_eq!(record.receiver, "user-b");
    }

    #[tokio::test]
    async fn test_unknown_receiver_not_found() {
        let (tracker, _, _, _) = setup().await;

        let err = tracker.send_message("user-a", send_input("nobody")).await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delivered_receipt_advances_and_notifies_sender() {
        let (tracker, directory, backend, _) = setup().await;
        directory.set_push_token("user-a", Some("token-a")).await.unwrap();

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        let receipt = tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Delivered)
            .await
            .unwrap();

        assert_eq!(receipt.status, DeliveryStatus::Delivered);

        let record = tracker.find_by_id(&outcome.message_id).await.unwrap().unwrap();
        assert!(record.delivered_at.is_some());
        assert!(record.read_at.is_none());

        // Receipt notification went back to the sender's device
        assert_eq!(backend.sent_count(), 1);
        let payload = backend.last_payload().unwrap();
        assert_eq!(payload.kind, "receipt");
        assert_eq!(payload.status.as_deref(), Some("delivered"));
    }

    #[tokio::test]
    async fn test_receipt_relay_failure_does_not_fail_receipt() {
        let (tracker, directory, backend, _) = setup().await;
        directory.set_push_token("user-a", Some("token-a")).await.unwrap();

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        backend.set_fail(true);
        let receipt = tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_read_receipt_backfills_delivered_at() {
        let (tracker, _, _, _) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();
        tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Read)
            .await
            .unwrap();

        let record = tracker.find_by_id(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Read);
        assert!(record.delivered_at.is_some());
        assert!(record.read_at.is_some());
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let (tracker, _, _, _) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();
        tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Read)
            .await
            .unwrap();

        // A late delivered receipt leaves the record at read
        let receipt = tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Read);

        let record = tracker.find_by_id(&outcome.message_id).await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_receipt_restricted_to_receiver() {
        let (tracker, _, _, _) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        let err = tracker
            .submit_receipt("user-a", &outcome.message_id, DeliveryStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_receipt_rejects_non_receipt_statuses() {
        let (tracker, _, _, _) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        let err = tracker
            .submit_receipt("user-b", &outcome.message_id, DeliveryStatus::Pushed)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pending_sync_filters_and_orders() {
        let (tracker, _, _, _) = setup().await;
        let epoch = Utc::now() - Duration::hours(1);

        for (id, offset) in [("m1", 10), ("m2", 20), ("m3", 30)] {
            tracker
                .send_message(
                    "user-a",
                    SendMessageInput {
                        conversation_id: "user-a:user-b".to_string(),
                        receiver: "user-b".to_string(),
                        body: format!("msg {}", id),
                        message_id: Some(id.to_string()),
                        sent_at: Some(epoch + Duration::minutes(offset)),
                    },
                )
                .await
                .unwrap();
        }

        // Cursor past m1 leaves m2 and m3, oldest first
        let since = epoch + Duration::minutes(15);
        let records = tracker
            .pending_sync("user-b", "user-a:user-b", since, None)
            .await
            .unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        // Sender is a participant but not the receiver of these records
        let for_sender = tracker
            .pending_sync("user-a", "user-a:user-b", since, None)
            .await
            .unwrap();
        assert!(for_sender.is_empty());
    }

    #[tokio::test]
    async fn test_pending_sync_requires_participant() {
        let (tracker, _, _, _) = setup().await;

        let err = tracker
            .pending_sync("user-c", "user-a:user-b", Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Authorization(_)));

        let err = tracker
            .pending_sync("user-a", "not-a-conversation", Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[tokio::test]
    async fn test_expired_records_are_purged() {
        let (tracker, _, _, db) = setup().await;

        let outcome = tracker.send_message("user-a", send_input("user-b")).await.unwrap();

        // Nothing expired yet
        assert_eq!(tracker.purge_expired().await.unwrap(), 0);

        // Force the record past its horizon
        sqlx::query("UPDATE message_delivery SET expires_at = ?1 WHERE message_id = ?2")
            .bind((Utc::now() - Duration::minutes(1)).to_rfc3339())
            .bind(&outcome.message_id)
            .execute(&db)
            .await
            .unwrap();

        assert_eq!(tracker.purge_expired().await.unwrap(), 1);
        assert!(tracker.find_by_id(&outcome.message_id).await.unwrap().is_none());
    }

    #[test]
    fn test_ttl_tightens_after_sync() {
        assert!(DeliveryStatus::Read.ttl() < DeliveryStatus::Accepted.ttl());
        assert!(DeliveryStatus::Delivered.ttl() < DeliveryStatus::Pushed.ttl());
    }

    #[test]
    fn test_rank_ordering() {
        assert!(DeliveryStatus::Failed.rank() < DeliveryStatus::Accepted.rank());
        assert!(DeliveryStatus::Accepted.rank() < DeliveryStatus::Pushed.rank());
        assert!(DeliveryStatus::Pushed.rank() < DeliveryStatus::Delivered.rank());
        assert!(DeliveryStatus::Delivered.rank() < DeliveryStatus::Read.rank());
    }
}
