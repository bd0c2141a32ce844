/// Background task implementations
use crate::{context::AppContext, error::CourierResult};

/// Remove delivery records whose expiry horizon has passed
pub async fn purge_expired_deliveries(ctx: &AppContext) -> CourierResult<u64> {
    ctx.delivery_tracker.purge_expired().await
}

/// Health check - verify the database is reachable
pub async fn health_check(ctx: &AppContext) -> CourierResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;

    Ok(())
}
