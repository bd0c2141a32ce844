/// Profile API endpoints
///
/// Thin surface over the user directory. The phone endpoint is the sync
/// point that keeps the ownership ledger consistent with the directory.
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{CourierError, CourierResult},
    phone::normalize,
};
use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/profile", get(get_profile))
        .route("/api/profile/phone", put(update_phone))
        .route("/api/profile/username", put(update_username))
        .route("/api/profile/push-token", put(update_push_token))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub identity: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub has_push_token: bool,
}

pub async fn get_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> CourierResult<Json<ProfileResponse>> {
    let record = ctx
        .user_directory
        .find_by_identity(&auth.identity)
        .await?
        .ok_or_else(|| CourierError::NotFound("Profile not found".to_string()))?;

    Ok(Json(ProfileResponse {
        identity: record.identity,
        username: record.username,
        display_name: record.display_name,
        phone: record.phone,
        has_push_token: record.push_token.is_some(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePhoneBody {
    /// New phone number; empty clears the phone on file
    pub phone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePhoneResponse {
    pub phone: Option<String>,
}

pub async fn update_phone(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<UpdatePhoneBody>,
) -> CourierResult<Json<UpdatePhoneResponse>> {
    let raw = body.phone.trim();
    let lookup = normalize::lookup_key(raw);

    if !raw.is_empty() && lookup.is_empty() {
        return Err(CourierError::Validation(
            "Phone number is too short".to_string(),
        ));
    }

    let record = ctx.user_directory.ensure_record(&auth.identity).await?;
    let previous_lookup = record.phone_lookup.unwrap_or_default();

    // Both the ledger and the legacy directory field must agree the number
    // is free before the change is accepted
    if ctx
        .phone_ledger
        .is_phone_taken(&lookup, &auth.identity)
        .await?
    {
        return Err(CourierError::Conflict(
            "Phone number already belongs to another account".to_string(),
        ));
    }

    let display = normalize::display_form(raw);

    if lookup.is_empty() {
        ctx.user_directory.clear_phone(&auth.identity).await?;
    } else {
        ctx.user_directory
            .set_phone(&auth.identity, &display, &lookup)
            .await?;
    }

    ctx.phone_ledger
        .set_current_owner(&auth.identity, raw, &previous_lookup)
        .await?;

    Ok(Json(UpdatePhoneResponse {
        phone: if lookup.is_empty() {
            None
        } else {
            Some(display)
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUsernameBody {
    pub username: String,
}

pub async fn update_username(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<UpdateUsernameBody>,
) -> CourierResult<Json<()>> {
    let username = body.username.trim().to_lowercase();

    if username.is_empty() {
        return Err(CourierError::Validation(
            "Username cannot be empty".to_string(),
        ));
    }

    if username.len() > 32 {
        return Err(CourierError::Validation(
            "Username too long (max 32 characters)".to_string(),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(CourierError::Validation(
            "Username contains invalid characters".to_string(),
        ));
    }

    ctx.user_directory
        .set_username(&auth.identity, &username)
        .await?;

    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePushTokenBody {
    /// Device token; null unregisters the device
    pub push_token: Option<String>,
}

pub async fn update_push_token(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(body): Json<UpdatePushTokenBody>,
) -> CourierResult<Json<()>> {
    ctx.user_directory
        .set_push_token(&auth.identity, body.push_token.as_deref())
        .await?;

    Ok(Json(()))
}
