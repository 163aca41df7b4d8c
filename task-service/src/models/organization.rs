//! Organization model - the tenant boundary for all other entities.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Organization entity. Immutable identity boundary: every task, membership,
/// refresh token, and real-time channel is scoped to exactly one org.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Organization {
    pub org_id: Uuid,
    pub subdomain: String,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Organization {
    pub fn new(subdomain: String, name: String) -> Self {
        Self {
            org_id: Uuid::new_v4(),
            subdomain,
            name,
            created_utc: Utc::now(),
        }
    }
}
