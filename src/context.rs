/// Application context and dependency injection
///
/// Built exactly once at process start and cloned into handlers; there is
/// no lazily-initialized global state anywhere in the backend.
use crate::{
    config::ServerConfig,
    db,
    directory::UserDirectory,
    error::CourierResult,
    messaging::DeliveryTracker,
    phone::{ClaimWorkflow, PhoneLedger},
    push::PushRelay,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub user_directory: UserDirectory,
    pub phone_ledger: PhoneLedger,
    pub claim_workflow: ClaimWorkflow,
    pub delivery_tracker: DeliveryTracker,
    pub push_relay: PushRelay,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> CourierResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize database
        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        // Initialize services
        let user_directory = UserDirectory::new(pool.clone());
        let phone_ledger = PhoneLedger::new(pool.clone());
        let claim_workflow = ClaimWorkflow::new(
            pool.clone(),
            phone_ledger.clone(),
            user_directory.clone(),
        );

        let push_relay = PushRelay::new(config.push.clone())?;
        let delivery_tracker =
            DeliveryTracker::new(pool.clone(), user_directory.clone(), push_relay.clone());

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            user_directory,
            phone_ledger,
            claim_workflow,
            delivery_tracker,
            push_relay,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
