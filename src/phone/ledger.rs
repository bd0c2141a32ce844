/// Phone Ownership Ledger
///
/// Time-ranged bindings between a normalized phone number and the account
/// that owns it. The partial unique index on the current-flag subset is what
/// guarantees at most one current owner per number across processes.
use crate::error::{CourierError, CourierResult};
use crate::phone::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Time-ranged phone-to-owner link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneLink {
    pub id: i64,
    pub identity: String,
    pub phone_lookup: String,
    pub phone_display: String,
    pub is_current: bool,
    pub valid_from: DateTime<Utc>,
    /// None while the link is current
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current and most recently closed link for a number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerHistory {
    pub current: Option<PhoneLink>,
    pub previous: Option<PhoneLink>,
}

/// Phone ownership ledger service
#[derive(Clone)]
pub struct PhoneLedger {
    db: SqlitePool,
}

impl PhoneLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record that an account's phone changed, closing the prior link and
    /// opening (or refreshing) the current one.
    ///
    /// Returns None when the new phone normalizes to an empty key, meaning
    /// the account now has no phone on file. Idempotent for repeated calls
    /// with the same arguments.
    pub async fn set_current_owner(
        &self,
        identity: &str,
        raw_phone: &str,
        previous_lookup: &str,
    ) -> CourierResult<Option<PhoneLink>> {
        let new_key = normalize::lookup_key(raw_phone);
        let display = normalize::display_form(raw_phone);
        let now = Utc::now();

        // Close the prior link when the number actually changed
        if !previous_lookup.is_empty() && previous_lookup != new_key {
            self.close_current_for_owner(identity, previous_lookup, now)
                .await?;
        }

        if new_key.is_empty() {
            return Ok(None);
        }

        match self.find_current(&new_key).await? {
            Some(link) if link.identity == identity => {
                sqlx::query(
                    "UPDATE phone_link SET phone_display = ?1, updated_at = ?2 WHERE id = ?3",
                )
                .bind(&display)
                .bind(now.to_rfc3339())
                .bind(link.id)
                .execute(&self.db)
                .await?;

                Ok(Some(PhoneLink {
                    phone_display: display,
                    updated_at: now,
                    ..link
                }))
            }
            Some(link) => Err(CourierError::Conflict(format!(
                "Phone {} is currently owned by another account",
                link.phone_lookup
            ))),
            None => Ok(Some(self.open_current(identity, &new_key, &display, now).await?)),
        }
    }

    /// True when any other account holds the number, either through a
    /// current link or through a directly stored normalized phone on its
    /// user record. The second source is a pre-ledger compatibility path;
    /// new data always has a matching link. Empty keys are never taken.
    pub async fn is_phone_taken(
        &self,
        lookup: &str,
        excluding_identity: &str,
    ) -> CourierResult<bool> {
        if lookup.is_empty() {
            return Ok(false);
        }

        if let Some(link) = self.find_current(lookup).await? {
            if link.identity != excluding_identity {
                return Ok(true);
            }
        }

        // Legacy fallback: records that predate the ledger
        let row = sqlx::query(
            "SELECT identity FROM user_account WHERE phone_lookup = ?1 AND identity != ?2 LIMIT 1",
        )
        .bind(lookup)
        .bind(excluding_identity)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    /// Current link plus the most recently closed one for a number
    pub async fn owner_history(&self, lookup: &str) -> CourierResult<OwnerHistory> {
        if lookup.is_empty() {
            return Ok(OwnerHistory {
                current: None,
                previous: None,
            });
        }

        let current = self.find_current(lookup).await?;

        let previous = sqlx::query(
            "SELECT id, identity, phone_lookup, phone_display, is_current, valid_from, valid_to, created_at, updated_at
             FROM phone_link
             WHERE phone_lookup = ?1 AND is_current = 0
             ORDER BY valid_to DESC
             LIMIT 1",
        )
        .bind(lookup)
        .fetch_optional(&self.db)
        .await?
        .map(|row| Self::parse_link(&row))
        .transpose()?;

        Ok(OwnerHistory { current, previous })
    }

    /// Find the current link for a number, if any
    pub async fn find_current(&self, lookup: &str) -> CourierResult<Option<PhoneLink>> {
        if lookup.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, identity, phone_lookup, phone_display, is_current, valid_from, valid_to, created_at, updated_at
             FROM phone_link
             WHERE phone_lookup = ?1 AND is_current = 1",
        )
        .bind(lookup)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| Self::parse_link(&r)).transpose()
    }

    /// Close every current link for a number. Used by claim approval where
    /// the old owner must lose the link before the new one is written.
    /// Should affect exactly one row; more indicates drift worth logging.
    pub async fn close_all_current(&self, lookup: &str, at: DateTime<Utc>) -> CourierResult<u64> {
        let result = sqlx::query(
            "UPDATE phone_link SET is_current = 0, valid_to = ?1, updated_at = ?1 WHERE phone_lookup = ?2 AND is_current = 1",
        )
        .bind(at.to_rfc3339())
        .bind(lookup)
        .execute(&self.db)
        .await?;

        let closed = result.rows_affected();
        if closed > 1 {
            tracing::warn!("Closed {} current links for {}", closed, lookup);
        }

        Ok(closed)
    }

    /// Open a new current link. A racing insert for a number that already
    /// has a current link is rejected by the unique index and surfaces as
    /// a conflict.
    pub async fn open_current(
        &self,
        identity: &str,
        lookup: &str,
        display: &str,
        at: DateTime<Utc>,
    ) -> CourierResult<PhoneLink> {
        let result = sqlx::query(
            "INSERT INTO phone_link (identity, phone_lookup, phone_display, is_current, valid_from, valid_to, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, NULL, ?4, ?4)",
        )
        .bind(identity)
        .bind(lookup)
        .bind(display)
        .bind(at.to_rfc3339())
        .execute(&self.db)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => CourierError::Conflict(format!(
                "Phone {} is currently owned by another account",
                lookup
            )),
            _ => CourierError::Database(e),
        })?;

        Ok(PhoneLink {
            id: result.last_insert_rowid(),
            identity: identity.to_string(),
            phone_lookup: lookup.to_string(),
            phone_display: display.to_string(),
            is_current: true,
            valid_from: at,
            valid_to: None,
            created_at: at,
            updated_at: at,
        })
    }

    async fn close_current_for_owner(
        &self,
        identity: &str,
        lookup: &str,
        at: DateTime<Utc>,
    ) -> CourierResult<()> {
        sqlx::query(
            "UPDATE phone_link SET is_current = 0, valid_to = ?1, updated_at = ?1
             WHERE identity = ?2 AND phone_lookup = ?3 AND is_current = 1",
        )
        .bind(at.to_rfc3339())
        .bind(identity)
        .bind(lookup)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    fn parse_link(row: &sqlx::sqlite::SqliteRow) -> CourierResult<PhoneLink> {
        let valid_from_str: String = row.get("valid_from");
        let valid_from = parse_timestamp(&valid_from_str)?;

        let valid_to = row
            .try_get::<Option<String>, _>("valid_to")
            .ok()
            .flatten()
            .map(|s| parse_timestamp(&s))
            .transpose()?;

        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(PhoneLink {
            id: row.get("id"),
            identity: row.get("identity"),
            phone_lookup: row.get("phone_lookup"),
            phone_display: row.get("phone_display"),
            is_current: row.get("is_current"),
            valid_from,
            valid_to,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

pub(crate) fn parse_timestamp(s: &str) -> CourierResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CourierError::Internal(format!("Invalid timestamp: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn setup_db() -> SqlitePool {
        let db = SqlitePool::connect(":memory:").await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE phone_link (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL,
                phone_lookup TEXT NOT NULL,
                phone_display TEXT NOT NULL,
                is_current INTEGER NOT NULL DEFAULT 1,
                valid_from TEXT NOT NULL,
                valid_to TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await
        .unwrap();

        sqlx::query(
            "CREATE UNIQUE INDEX idx_phone_link_current ON phone_link (phone_lookup) WHERE is_current = 1",
        )
        .execute(&db)
        .await
        .unwrap();

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

        db
    }

    #[tokio::test]
    async fn test_first_link_opens_current() {
        let ledger = PhoneLedger::new(setup_db().await);

        let link = ledger
            .set_current_owner("user-a", "+1 (555) 123-4567", "")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(link.phone_lookup, "5551234567");
        assert_eq!(link.phone_display, "+15551234567");
        assert!(link.is_current);
        assert!(link.valid_to.is_none());
    }

    #[tokio::test]
    async fn test_phone_change_closes_old_link() {
        let ledger = PhoneLedger::new(setup_db().await);

        ledger
            .set_current_owner("user-a", "5551234567", "")
            .await
            .unwrap();
        ledger
            .set_current_owner("user-a", "5559876543", "5551234567")
            .await
            .unwrap();

        assert!(ledger.find_current("5551234567").await.unwrap().is_none());

        let current = ledger.find_current("5559876543").await.unwrap().unwrap();
        assert_eq!(current.identity, "user-a");

        let history = ledger.owner_history("5551234567").await.unwrap();
        assert!(history.current.is_none());
        let previous = history.previous.unwrap();
        assert_eq!(previous.identity, "user-a");
        assert!(previous.valid_to.is_some());
    }

    #[tokio::test]
    async fn test_set_current_owner_is_idempotent() {
        let ledger = PhoneLedger::new(setup_db().await);

        let first = ledger
            .set_current_owner("user-a", "5551234567", "")
            .await
            .unwrap()
            .unwrap();
        let second = ledger
            .set_current_owner("user-a", "5551234567", "5551234567")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.is_current);
    }

    #[tokio::test]
    async fn test_empty_phone_clears_without_link() {
        let ledger = PhoneLedger::new(setup_db().await);

        ledger
            .set_current_owner("user-a", "5551234567", "")
            .await
            .unwrap();

        let link = ledger
            .set_current_owner("user-a", "", "5551234567")
            .await
            .unwrap();

        assert!(link.is_none());
        assert!(ledger.find_current("5551234567").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_account_conflicts() {
        let ledger = PhoneLedger::new(setup_db().await);

        ledger
            .set_current_owner("user-a", "5551234567", "")
            .await
            .unwrap();

        let err = ledger
            .set_current_owner("user-b", "5551234567", "")
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unique_index_rejects_racing_insert() {
        let ledger = PhoneLedger::new(setup_db().await);
        let now = Utc::now();

        ledger
            .open_current("user-a", "5551234567", "5551234567", now)
            .await
            .unwrap();

        // Simulates a writer that raced past the is_phone_taken check
        let err = ledger
            .open_current("user-b", "5551234567", "5551234567", now)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_is_phone_taken() {
        let ledger = PhoneLedger::new(setup_db().await);

        ledger
            .set_current_owner("user-a", "5551234567", "")
            .await
            .unwrap();

        assert!(ledger.is_phone_taken("5551234567", "user-b").await.unwrap());
        assert!(!ledger.is_phone_taken("5551234567", "user-a").await.unwrap());
        assert!(!ledger.is_phone_taken("", "user-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_phone_taken_legacy_fallback() {
        let db = setup_db().await;

        // A record from before the ledger existed: phone on the user record,
        // no phone_link row.
        sqlx::query(
            "INSERT INTO user_account (identity, phone, phone_lookup, created_at, updated_at)
             VALUES ('user-legacy', '5550001111', '5550001111', ?1, ?1)",
        )
        .bind(Utc::now())
        .execute(&db)
        .await
        .unwrap();

        let ledger = PhoneLedger::new(db);

        assert!(ledger.is_phone_taken("5550001111", "user-b").await.unwrap());
        assert!(!ledger
            .is_phone_taken("5550001111", "user-legacy")
            .await
            .unwrap());
    }
}
