/// Phone claim API endpoints
///
/// Request a transfer of a number owned by another account, list claims
/// addressed to you, and respond to them.
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{CourierError, CourierResult},
    phone::{ClaimAction, PhoneClaim},
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/claims", post(request_claim))
        .route("/api/claims/incoming", get(list_incoming))
        .route("/api/claims/:id/respond", post(respond_claim))
}

/// Claim as exposed over the API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub id: String,
    pub phone: String,
    pub requester: String,
    pub target: String,
    pub status: String,
    pub reject_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PhoneClaim> for ClaimView {
    fn from(claim: &PhoneClaim) -> Self {
        Self {
            id: claim.id.clone(),
            phone: claim.phone_display.clone(),
            requester: claim.requester.clone(),
            target: claim.target.clone(),
            status: claim.status.as_str().to_string(),
            reject_count: claim.reject_count,
            created_at: claim.created_at,
            updated_at: claim.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaimBody {
    /// Phone number the caller wants transferred
    pub phone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaimResponse {
    pub claim: ClaimView,
    /// Whether the owner-facing UI should surface the block option
    pub offer_block: bool,
}

pub async fn request_claim(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<RequestClaimBody>,
) -> CourierResult<Json<RequestClaimResponse>> {
    if body.phone.trim().is_empty() {
        return Err(CourierError::Validation(
            "Phone number cannot be empty".to_string(),
        ));
    }

    let outcome = ctx.claim_workflow.request(&auth.identity, &body.phone).await?;

    Ok(Json(RequestClaimResponse {
        claim: ClaimView::from(&outcome.claim),
        offer_block: outcome.offer_block,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingClaimsResponse {
    pub claims: Vec<ClaimView>,
}

pub async fn list_incoming(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> CourierResult<Json<IncomingClaimsResponse>> {
    let claims = ctx.claim_workflow.list_incoming(&auth.identity).await?;

    Ok(Json(IncomingClaimsResponse {
        claims: claims.iter().map(ClaimView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondClaimBody {
    /// One of "approve", "reject", "block"
    pub action: String,
    #[serde(default)]
    pub pin_approved: bool,
    #[serde(default)]
    pub biometric_approved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondClaimResponse {
    pub claim: ClaimView,
    pub offer_block: bool,
    /// On approval: the former owner's record no longer carries a phone and
    /// they must supply a new one
    pub owner_must_rebind: bool,
}

pub async fn respond_claim(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(claim_id): Path<String>,
    Json(body): Json<RespondClaimBody>,
) -> CourierResult<Json<RespondClaimResponse>> {
    let action = ClaimAction::from_str(&body.action)?;

    let outcome = ctx
        .claim_workflow
        .respond(
            &claim_id,
            &auth.identity,
            action,
            body.pin_approved,
            body.biometric_approved,
        )
        .await?;

    Ok(Json(RespondClaimResponse {
        claim: ClaimView::from(&outcome.claim),
        offer_block: outcome.offer_block,
        owner_must_rebind: outcome.owner_must_rebind,
    }))
}
