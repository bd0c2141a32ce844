/// User Directory
///
/// Read/write access to user records keyed by identity. The directory is the
/// authoritative store for an account's last-known phone; the ownership
/// ledger is kept eventually consistent with it through explicit sync calls.
use crate::error::{CourierError, CourierResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// User record in the directory
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRecord {
    pub identity: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    /// Display-form phone as the user entered it
    pub phone: Option<String>,
    /// Normalized lookup key for the phone
    pub phone_lookup: Option<String>,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User directory service
#[derive(Clone)]
pub struct UserDirectory {
    db: SqlitePool,
}

impl UserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find a user record by identity
    pub async fn find_by_identity(&self, identity: &str) -> CourierResult<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT identity, username, display_name, phone, phone_lookup, push_token, created_at, updated_at
             FROM user_account WHERE identity = ?1",
        )
        .bind(identity)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// Find a user record by username
    pub async fn find_by_username(&self, username: &str) -> CourierResult<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT identity, username, display_name, phone, phone_lookup, push_token, created_at, updated_at
             FROM user_account WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// Find a user record by normalized phone. Empty keys never match.
    pub async fn find_by_phone_lookup(&self, lookup: &str) -> CourierResult<Option<UserRecord>> {
        if lookup.is_empty() {
            return Ok(None);
        }

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT identity, username, display_name, phone, phone_lookup, push_token, created_at, updated_at
             FROM user_account WHERE phone_lookup = ?1",
        )
        .bind(lookup)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// Ensure a directory record exists for an identity, creating a bare one
    /// on first contact with the auth provider.
    pub async fn ensure_record(&self, identity: &str) -> CourierResult<UserRecord> {
        if let Some(record) = self.find_by_identity(identity).await? {
            return Ok(record);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO user_account (identity, created_at, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO NOTHING",
        )
        .bind(identity)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.find_by_identity(identity)
            .await?
            .ok_or_else(|| CourierError::Internal("Directory record vanished".to_string()))
    }

    /// Check whether a username is held by any other account
    pub async fn is_username_taken(
        &self,
        username: &str,
        excluding_identity: &str,
    ) -> CourierResult<bool> {
        let existing = self.find_by_username(username).await?;
        Ok(matches!(existing, Some(record) if record.identity != excluding_identity))
    }

    /// Update an account's username. Uniqueness is enforced both by an
    /// up-front check and the unique index on the column.
    pub async fn set_username(&self, identity: &str, username: &str) -> CourierResult<()> {
        if self.is_username_taken(username, identity).await? {
            return Err(CourierError::Conflict(format!(
                "Username {} already taken",
                username
            )));
        }

        let result = sqlx::query(
            "UPDATE user_account SET username = ?1, updated_at = ?2 WHERE identity = ?3",
        )
        .bind(username)
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.db)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                CourierError::Conflict(format!("Username {} already taken", username))
            }
            _ => CourierError::Database(e),
        })?;

        if result.rows_affected() == 0 {
            return Err(CourierError::NotFound(format!("User {} not found", identity)));
        }

        Ok(())
    }

    /// Set the phone fields on a user record
    pub async fn set_phone(
        &self,
        identity: &str,
        phone_display: &str,
        phone_lookup: &str,
    ) -> CourierResult<()> {
        let result = sqlx::query(
            "UPDATE user_account SET phone = ?1, phone_lookup = ?2, updated_at = ?3 WHERE identity = ?4",
        )
        .bind(phone_display)
        .bind(phone_lookup)
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CourierError::NotFound(format!("User {} not found", identity)));
        }

        Ok(())
    }

    /// Clear the phone fields on a user record
    pub async fn clear_phone(&self, identity: &str) -> CourierResult<()> {
        sqlx::query(
            "UPDATE user_account SET phone = NULL, phone_lookup = NULL, updated_at = ?1 WHERE identity = ?2",
        )
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Register or replace the device push token for an account
    pub async fn set_push_token(&self, identity: &str, token: Option<&str>) -> CourierResult<()> {
        let result = sqlx::query(
            "UPDATE user_account SET push_token = ?1, updated_at = ?2 WHERE identity = ?3",
        )
        .bind(token)
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CourierError::NotFound(format!("User {} not found", identity)));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn setup_db() -> SqlitePool {
        let db = SqlitePool::connect(":memory:").await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE user_account (
                identity TEXT PRIMARY KEY,
                username TEXT,
                display_name TEXT,
                phone TEXT,
                phone_lookup TEXT,
                push_token TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await
        .unwrap();

        sqlx::query(
            "CREATE UNIQUE INDEX idx_user_account_username ON user_account (username) WHERE username IS NOT NULL",
        )
        .execute(&db)
        .await
        .unwrap();

        db
    }

    #[tokio::test]
    async fn test_ensure_record_is_idempotent() {
        let directory = UserDirectory::new(setup_db().await);

        let first = directory.ensure_record("user-a").await.unwrap();
        let second = directory.ensure_record("user-a").await.unwrap();

        assert_eq!(first.identity, second.identity);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_username_uniqueness() {
        let directory = UserDirectory::new(setup_db().await);
        directory.ensure_record("user-a").await.unwrap();
        directory.ensure_record("user-b").await.unwrap();

        directory.set_username("user-a", "ada").await.unwrap();

        let err = directory.set_username("user-b", "ada").await.unwrap_err();
        assert!(matches!(err, CourierError::Conflict(_)));

        // Re-asserting your own username is fine
        directory.set_username("user-a", "ada").await.unwrap();
    }

    #[tokio::test]
    async fn test_phone_fields_roundtrip() {
        let directory = UserDirectory::new(setup_db().await);
        directory.ensure_record("user-a").await.unwrap();

        directory
            .set_phone("user-a", "+15551234567", "5551234567")
            .await
            .unwrap();

        let record = directory
            .find_by_phone_lookup("5551234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.identity, "user-a");
        assert_eq!(record.phone.as_deref(), Some("+15551234567"));

        directory.clear_phone("user-a").await.unwrap();
        assert!(directory
            .find_by_phone_lookup("5551234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_lookup_never_matches() {
        let directory = UserDirectory::new(setup_db().await);
        directory.ensure_record("user-a").await.unwrap();

        assert!(directory.find_by_phone_lookup("").await.unwrap().is_none());
    }
}
