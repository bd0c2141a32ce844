/// Message relay API endpoints
///
/// Send a message through the push relay, submit delivery receipts, and
/// pull pending records for offline catch-up.
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{CourierError, CourierResult},
    messaging::{DeliveryStatus, MessageDelivery, SendMessageInput},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/messages", post(send_message))
        .route("/api/messages/:id/receipt", post(submit_receipt))
        .route("/api/messages/pending", get(pending_sync))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub conversation_id: String,
    /// Identity, username, or phone number of the receiver
    pub receiver: String,
    pub body: String,
    /// Client-supplied id for idempotent retries
    pub message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
    pub status: String,
    pub queued: bool,
}

pub async fn send_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<SendMessageBody>,
) -> CourierResult<Json<SendMessageResponse>> {
    let outcome = ctx
        .delivery_tracker
        .send_message(
            &auth.identity,
            SendMessageInput {
                conversation_id: body.conversation_id,
                receiver: body.receiver,
                body: body.body,
                message_id: body.message_id,
                sent_at: body.sent_at,
            },
        )
        .await?;

    Ok(Json(SendMessageResponse {
        message_id: outcome.message_id,
        status: outcome.status.as_str().to_string(),
        queued: outcome.queued,
    }))
}

/// Receipt statuses a client may submit
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

impl From<ReceiptStatus> for DeliveryStatus {
    fn from(status: ReceiptStatus) -> Self {
        match status {
            ReceiptStatus::Delivered => DeliveryStatus::Delivered,
            ReceiptStatus::Read => DeliveryStatus::Read,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptBody {
    pub status: ReceiptStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub message_id: String,
    pub status: String,
}

pub async fn submit_receipt(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(message_id): Path<String>,
    Json(body): Json<ReceiptBody>,
) -> CourierResult<Json<ReceiptResponse>> {
    let outcome = ctx
        .delivery_tracker
        .submit_receipt(&auth.identity, &message_id, body.status.into())
        .await?;

    Ok(Json(ReceiptResponse {
        message_id: outcome.message_id,
        status: outcome.status.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncParams {
    pub conversation_id: String,
    /// Cursor: only records with a later message timestamp are returned
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Delivery record as exposed over the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    pub message_id: String,
    pub conversation_id: String,
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&MessageDelivery> for DeliveryView {
    fn from(record: &MessageDelivery) -> Self {
        Self {
            message_id: record.message_id.clone(),
            conversation_id: record.conversation_id.clone(),
            sender: record.sender.clone(),
            body: record.body.clone(),
            sent_at: record.sent_at,
            status: record.status.as_str().to_string(),
            delivered_at: record.delivered_at,
            read_at: record.read_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncResponse {
    pub messages: Vec<DeliveryView>,
}

pub async fn pending_sync(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<PendingSyncParams>,
) -> CourierResult<Json<PendingSyncResponse>> {
    if params.conversation_id.is_empty() {
        return Err(CourierError::Validation(
            "Conversation id cannot be empty".to_string(),
        ));
    }

    let since = params
        .since
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now));

    let records = ctx
        .delivery_tracker
        .pending_sync(&auth.identity, &params.conversation_id, since, params.limit)
        .await?;

    Ok(Json(PendingSyncResponse {
        messages: records.iter().map(DeliveryView::from).collect(),
    }))
}
