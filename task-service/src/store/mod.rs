//! Storage seam for task-service.
//!
//! All persistence sits behind the [`Store`] trait so the service layer is
//! backend-agnostic: Postgres in deployment, in-memory for tests and local
//! runs. Every method past tenant resolution takes an `org_id` predicate;
//! there is deliberately no "find task by id across orgs" operation.

mod memory;
mod postgres;

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{Membership, Organization, OtpChallenge, RefreshToken, Task, User};

pub use memory::MemStore;
pub use postgres::{create_pool, run_migrations, PgStore};

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // ==================== Organizations ====================

    async fn insert_organization(&self, org: &Organization) -> Result<(), AppError>;
    async fn find_org_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, AppError>;
    async fn find_org_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Organization>, AppError>;

    // ==================== Users ====================

    async fn insert_user(&self, user: &User) -> Result<(), AppError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    // ==================== Memberships ====================

    async fn insert_membership(&self, membership: &Membership) -> Result<(), AppError>;
    async fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, AppError>;
    /// Oldest membership for a user, used when no tenant context disambiguates.
    async fn find_first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, AppError>;

    // ==================== OTP challenges ====================

    async fn insert_otp_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError>;
    async fn find_otp_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError>;
    /// Newest unconsumed challenge for a user (email-based verify path).
    async fn find_latest_otp_challenge_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError>;
    /// Compare-and-swap consumption: sets `consumed_utc` only if currently
    /// unset. Returns true for exactly one caller per challenge.
    async fn consume_otp_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError>;

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError>;
    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError>;
    /// The rotation critical section: revoke the old token (only if still
    /// active) and insert its successor as one atomic step. Returns true for
    /// exactly one caller per token; on false nothing is written, and any
    /// subsequent chain revocation by the loser is guaranteed to see the
    /// winner's successor.
    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool, AppError>;
    /// Revoke every active token for the user within the org. Returns the
    /// number of rows revoked.
    async fn revoke_refresh_chain(&self, user_id: Uuid, org_id: Uuid) -> Result<u64, AppError>;

    // ==================== Tasks ====================

    async fn insert_task(&self, task: &Task) -> Result<(), AppError>;
    async fn list_tasks(&self, org_id: Uuid) -> Result<Vec<Task>, AppError>;
    async fn find_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError>;
    async fn update_task(&self, task: &Task) -> Result<(), AppError>;
    /// Delete and return the record's last state (carried by the
    /// `task_deleted` event).
    async fn delete_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError>;
}
