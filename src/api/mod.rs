/// API routes and handlers
pub mod claims;
pub mod messages;
pub mod middleware;
pub mod profile;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(profile::routes())
        .merge(claims::routes())
        .merge(messages::routes())
}
