//! Refresh token model - one row per issued refresh token, forming a linear
//! rotation chain through `rotated_from`.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token entity. The opaque token string itself is never stored,
/// only its SHA-256 hash. A revoked row that is presented again is a reuse
/// signal for the whole chain.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub token_hash: String,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub rotated_from: Option<Uuid>,
}

impl RefreshToken {
    pub fn new(
        user_id: Uuid,
        org_id: Uuid,
        token_hash: String,
        expiry_days: i64,
        rotated_from: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            org_id,
            token_hash,
            issued_utc: now,
            expiry_utc: now + Duration::days(expiry_days),
            revoked_utc: None,
            rotated_from,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}
