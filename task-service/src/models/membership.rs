//! Membership model - joins users to organizations with a role.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role codes within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(code: &str) -> Option<Role> {
        match code {
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

/// Membership entity. Unique per (user_id, org_id).
#[derive(Debug, Clone, FromRow)]
pub struct Membership {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role_code: String,
}

impl Membership {
    pub fn new(user_id: Uuid, org_id: Uuid, role: Role) -> Self {
        Self {
            membership_id: Uuid::new_v4(),
            user_id,
            org_id,
            role_code: role.as_str().to_string(),
        }
    }

    /// Role for this membership; unknown codes degrade to Member.
    pub fn role(&self) -> Role {
        Role::parse(&self.role_code).unwrap_or(Role::Member)
    }
}
