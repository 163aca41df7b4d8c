//! User model. Users exist independent of organizations and are joined to
//! them via memberships.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    /// Absent for users provisioned through an external identity provider.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            created_utc: Utc::now(),
        }
    }
}
