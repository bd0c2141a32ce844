/// Phone Claim Workflow
///
/// Lets an account request transfer of a phone number currently owned by
/// another account. Claims move from pending to approved, rejected, or
/// blocked; approval carries the ownership transfer across the ledger and
/// the user directory in a fixed order so a crash mid-sequence never leaves
/// two accounts both holding the number.
use crate::directory::UserDirectory;
use crate::error::{CourierError, CourierResult};
use crate::metrics;
use crate::phone::ledger::{parse_timestamp, PhoneLedger};
use crate::phone::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Rejections after which the owner is offered the block option
const BLOCK_OFFER_THRESHOLD: i64 = 2;

/// Claim lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Blocked,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> CourierResult<Self> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "approved" => Ok(ClaimStatus::Approved),
            "rejected" => Ok(ClaimStatus::Rejected),
            "blocked" => Ok(ClaimStatus::Blocked),
            _ => Err(CourierError::Internal(format!(
                "Unknown claim status: {}",
                s
            ))),
        }
    }
}

/// Action an owner can take on an incoming claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimAction {
    Approve,
    Reject,
    Block,
}

impl ClaimAction {
    pub fn from_str(s: &str) -> CourierResult<Self> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(ClaimAction::Approve),
            "reject" => Ok(ClaimAction::Reject),
            "block" => Ok(ClaimAction::Block),
            _ => Err(CourierError::Validation(format!(
                "Invalid claim action: {}",
                s
            ))),
        }
    }
}

/// Claim record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneClaim {
    pub id: String,
    pub phone_lookup: String,
    pub phone_display: String,
    pub requester: String,
    pub target: String,
    pub status: ClaimStatus,
    pub reject_count: i64,
    pub blocked_by_target: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of filing a claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimRequestOutcome {
    pub claim: PhoneClaim,
    /// Whether the owner-facing UI should surface the block option
    pub offer_block: bool,
}

/// Result of responding to a claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimResponseOutcome {
    pub claim: PhoneClaim,
    pub offer_block: bool,
    /// Set on approval when the former owner's directory phone was cleared
    /// and they must supply a new number
    pub owner_must_rebind: bool,
}

/// Claim workflow service
#[derive(Clone)]
pub struct ClaimWorkflow {
    db: SqlitePool,
    ledger: PhoneLedger,
    directory: UserDirectory,
}

impl ClaimWorkflow {
    pub fn new(db: SqlitePool, ledger: PhoneLedger, directory: UserDirectory) -> Self {
        Self {
            db,
            ledger,
            directory,
        }
    }

    /// File a claim for a number owned by another account.
    ///
    /// An identical pending claim is returned as-is rather than duplicated.
    /// The new claim's reject count carries over the number of times this
    /// requester has already been rejected for the same number and owner.
    pub async fn request(
        &self,
        requester: &str,
        raw_phone: &str,
    ) -> CourierResult<ClaimRequestOutcome> {
        let lookup = normalize::lookup_key(raw_phone);
        if lookup.is_empty() {
            return Err(CourierError::Validation(
                "Phone number is missing or too short".to_string(),
            ));
        }

        let current = self
            .ledger
            .find_current(&lookup)
            .await?
            .ok_or_else(|| CourierError::NotFound("Number has no current owner".to_string()))?;

        if current.identity == requester {
            return Err(CourierError::Validation(
                "You already own this number".to_string(),
            ));
        }

        let target = current.identity.clone();

        if self.is_blocked(&lookup, requester, &target).await? {
            return Err(CourierError::Authorization(
                "Claim requests for this number are blocked".to_string(),
            ));
        }

        // Idempotent: hand back the outstanding pending claim if one exists
        if let Some(pending) = self.find_pending(&lookup, requester, &target).await? {
            let offer_block = pending.reject_count >= BLOCK_OFFER_THRESHOLD;
            return Ok(ClaimRequestOutcome {
                claim: pending,
                offer_block,
            });
        }

        let prior_rejections = self.count_rejected(&lookup, requester, &target).await?;

        let now = Utc::now();
        let claim = PhoneClaim {
            id: Uuid::new_v4().to_string(),
            phone_lookup: lookup,
            phone_display: normalize::display_form(raw_phone),
            requester: requester.to_string(),
            target,
            status: ClaimStatus::Pending,
            reject_count: prior_rejections,
            blocked_by_target: false,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO phone_claim (id, phone_lookup, phone_display, requester, target, status, reject_count, blocked_by_target, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        )
        .bind(&claim.id)
        .bind(&claim.phone_lookup)
        .bind(&claim.phone_display)
        .bind(&claim.requester)
        .bind(&claim.target)
        .bind(claim.status.as_str())
        .bind(claim.reject_count)
        .bind(claim.blocked_by_target)
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        metrics::record_claim_transition("requested");

        let offer_block = claim.reject_count >= BLOCK_OFFER_THRESHOLD;
        Ok(ClaimRequestOutcome { claim, offer_block })
    }

    /// Pending claims addressed to an owner, newest first
    pub async fn list_incoming(&self, target: &str) -> CourierResult<Vec<PhoneClaim>> {
        let rows = sqlx::query(
            "SELECT id, phone_lookup, phone_display, requester, target, status, reject_count, blocked_by_target, created_at, updated_at
             FROM phone_claim
             WHERE target = ?1 AND status = 'pending'
             ORDER BY created_at DESC",
        )
        .bind(target)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::parse_claim).collect()
    }

    /// Owner's response to a claim. Only the claim's target may respond, and
    /// only while the claim is still pending.
    pub async fn respond(
        &self,
        claim_id: &str,
        caller: &str,
        action: ClaimAction,
        pin_approved: bool,
        biometric_approved: bool,
    ) -> CourierResult<ClaimResponseOutcome> {
        let claim = self
            .find_by_id(claim_id)
            .await?
            .ok_or_else(|| CourierError::NotFound(format!("Claim {} not found", claim_id)))?;

        if claim.target != caller {
            return Err(CourierError::Authorization(
                "Only the number's owner may respond to this claim".to_string(),
            ));
        }

        if claim.status != ClaimStatus::Pending {
            return Err(CourierError::Conflict(format!(
                "Claim is already {}",
                claim.status.as_str()
            )));
        }

        match action {
            ClaimAction::Reject => self.reject(claim).await,
            ClaimAction::Block => self.block(claim).await,
            ClaimAction::Approve => {
                if !pin_approved && !biometric_approved {
                    return Err(CourierError::Validation(
                        "Approval requires PIN or biometric confirmation".to_string(),
                    ));
                }
                self.approve(claim).await
            }
        }
    }

    /// Look up a claim by id
    pub async fn find_by_id(&self, claim_id: &str) -> CourierResult<Option<PhoneClaim>> {
        let row = sqlx::query(
            "SELECT id, phone_lookup, phone_display, requester, target, status, reject_count, blocked_by_target, created_at, updated_at
             FROM phone_claim WHERE id = ?1",
        )
        .bind(claim_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::parse_claim).transpose()
    }

    async fn reject(&self, claim: PhoneClaim) -> CourierResult<ClaimResponseOutcome> {
        let now = Utc::now();
        let new_count = claim.reject_count + 1;

        let result = sqlx::query(
            "UPDATE phone_claim SET status = 'rejected', reject_count = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
        )
        .bind(new_count)
        .bind(now.to_rfc3339())
        .bind(&claim.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CourierError::Conflict("Claim was already resolved".to_string()));
        }

        metrics::record_claim_transition("rejected");

        Ok(ClaimResponseOutcome {
            offer_block: new_count >= BLOCK_OFFER_THRESHOLD,
            claim: PhoneClaim {
                status: ClaimStatus::Rejected,
                reject_count: new_count,
                updated_at: now,
                ..claim
            },
            owner_must_rebind: false,
        })
    }

    async fn block(&self, claim: PhoneClaim) -> CourierResult<ClaimResponseOutcome> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE phone_claim SET status = 'blocked', blocked_by_target = 1, updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(&claim.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CourierError::Conflict("Claim was already resolved".to_string()));
        }

        metrics::record_claim_transition("blocked");

        Ok(ClaimResponseOutcome {
            claim: PhoneClaim {
                status: ClaimStatus::Blocked,
                blocked_by_target: true,
                updated_at: now,
                ..claim
            },
            offer_block: false,
            owner_must_rebind: false,
        })
    }

    /// Ownership transfer. The ordering is load-bearing: the old owner's
    /// link must close before the requester's directory phone is written,
    /// so a crash mid-sequence leaves the number transiently unowned rather
    /// than owned twice. Any error before the final update leaves the claim
    /// pending and the approval retryable.
    async fn approve(&self, claim: PhoneClaim) -> CourierResult<ClaimResponseOutcome> {
        // Re-verify ownership; a concurrent phone change invalidates the claim
        let current = self.ledger.find_current(&claim.phone_lookup).await?;
        let still_owned = matches!(current, Some(ref link) if link.identity == claim.target);
        if !still_owned {
            sqlx::query(
                "UPDATE phone_claim SET status = 'rejected', updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
            )
            .bind(Utc::now().to_rfc3339())
            .bind(&claim.id)
            .execute(&self.db)
            .await?;

            return Err(CourierError::Conflict(
                "Number is no longer owned by the claim's target".to_string(),
            ));
        }

        let now = Utc::now();

        // Close every current link for the number before opening the new one
        self.ledger.close_all_current(&claim.phone_lookup, now).await?;
        self.ledger
            .open_current(&claim.requester, &claim.phone_lookup, &claim.phone_display, now)
            .await?;

        // Former owner loses the number on their directory record only if it
        // still matches; they signal for a replacement through the response.
        let former = self.directory.find_by_identity(&claim.target).await?;
        let owner_must_rebind = matches!(
            former,
            Some(ref record) if record.phone_lookup.as_deref() == Some(claim.phone_lookup.as_str())
        );
        if owner_must_rebind {
            self.directory.clear_phone(&claim.target).await?;
        }

        self.directory.ensure_record(&claim.requester).await?;
        self.directory
            .set_phone(&claim.requester, &claim.phone_display, &claim.phone_lookup)
            .await?;

        let result = sqlx::query(
            "UPDATE phone_claim SET status = 'approved', updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(&claim.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CourierError::Conflict("Claim was already resolved".to_string()));
        }

        metrics::record_claim_transition("approved");

        Ok(ClaimResponseOutcome {
            claim: PhoneClaim {
                status: ClaimStatus::Approved,
                updated_at: now,
                ..claim
            },
            offer_block: false,
            owner_must_rebind,
        })
    }

    async fn is_blocked(
        &self,
        lookup: &str,
        requester: &str,
        target: &str,
    ) -> CourierResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM phone_claim
             WHERE phone_lookup = ?1 AND requester = ?2 AND target = ?3 AND status = 'blocked'
             LIMIT 1",
        )
        .bind(lookup)
        .bind(requester)
        .bind(target)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    async fn find_pending(
        &self,
        lookup: &str,
        requester: &str,
        target: &str,
    ) -> CourierResult<Option<PhoneClaim>> {
        let row = sqlx::query(
            "SELECT id, phone_lookup, phone_display, requester, target, status, reject_count, blocked_by_target, created_at, updated_at
             FROM phone_claim
             WHERE phone_lookup = ?1 AND requester = ?2 AND target = ?3 AND status = 'pending'
             LIMIT 1",
        )
        .bind(lookup)
        .bind(requester)
        .bind(target)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::parse_claim).transpose()
    }

    async fn count_rejected(
        &self,
        lookup: &str,
        requester: &str,
        target: &str,
    ) -> CourierResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM phone_claim
             WHERE phone_lookup = ?1 AND requester = ?2 AND target = ?3 AND status = 'rejected'",
        )
        .bind(lookup)
        .bind(requester)
        .bind(target)
        .fetch_one(&self.db)
        .await?;

        Ok(row.get("n"))
    }

    fn parse_claim(row: &sqlx::sqlite::SqliteRow) -> CourierResult<PhoneClaim> {
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(PhoneClaim {
            id: row.get("id"),
            phone_lookup: row.get("phone_lookup"),
            phone_display: row.get("phone_display"),
            requester: row.get("requester"),
            target: row.get("target"),
            status: ClaimStatus::from_str(&status_str)?,
            reject_count: row.get("reject_count"),
            blocked_by_target: row.get("blocked_by_target"),
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}
