//! OTP challenge model - single-use step-up codes issued after a successful
//! password check.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// OTP challenge entity. Only the salted hash of the code is stored;
/// `consumed_utc` is set exactly once, by the single winning verification.
#[derive(Debug, Clone, FromRow)]
pub struct OtpChallenge {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OtpChallenge {
    pub fn new(user_id: Uuid, code_hash: String, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            challenge_id: Uuid::new_v4(),
            user_id,
            code_hash,
            expiry_utc: now + Duration::minutes(ttl_minutes),
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiry_utc
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }
}
