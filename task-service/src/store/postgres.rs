//! PostgreSQL backend for the [`Store`] trait.
//!
//! Uses sqlx runtime queries. The two correctness-critical steps (OTP
//! consumption, refresh revocation) are single conditional UPDATEs; the row
//! count tells the caller whether it won the race.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{Membership, Organization, OtpChallenge, RefreshToken, Task, User};
use crate::store::Store;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(url: &str, config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// PostgreSQL store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                db_err(e)
            })?;
        Ok(())
    }

    // ==================== Organizations ====================

    async fn insert_organization(&self, org: &Organization) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO organizations (org_id, subdomain, name, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(org.org_id)
        .bind(&org.subdomain)
        .bind(&org.name)
        .bind(org.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_org_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, AppError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE org_id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_org_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Organization>, AppError> {
        sqlx::query_as::<_, Organization>(
            "SELECT * FROM organizations WHERE LOWER(subdomain) = LOWER($1)",
        )
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ==================== Users ====================

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    // ==================== Memberships ====================

    async fn insert_membership(&self, membership: &Membership) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO memberships (membership_id, user_id, org_id, role_code)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(membership.membership_id)
        .bind(membership.user_id)
        .bind(membership.org_id)
        .bind(&membership.role_code)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE user_id = $1 AND org_id = $2",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, AppError> {
        sqlx::query_as::<_, Membership>(
            "SELECT m.* FROM memberships m
             JOIN organizations o ON m.org_id = o.org_id
             WHERE m.user_id = $1
             ORDER BY o.created_utc ASC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ==================== OTP challenges ====================

    async fn insert_otp_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO otp_challenges
                (challenge_id, user_id, code_hash, expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(challenge.user_id)
        .bind(&challenge.code_hash)
        .bind(challenge.expiry_utc)
        .bind(challenge.consumed_utc)
        .bind(challenge.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_otp_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError> {
        sqlx::query_as::<_, OtpChallenge>("SELECT * FROM otp_challenges WHERE challenge_id = $1")
            .bind(challenge_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_latest_otp_challenge_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError> {
        sqlx::query_as::<_, OtpChallenge>(
            "SELECT * FROM otp_challenges
             WHERE user_id = $1 AND consumed_utc IS NULL
             ORDER BY created_utc DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn consume_otp_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE otp_challenges SET consumed_utc = $1
             WHERE challenge_id = $2 AND consumed_utc IS NULL",
        )
        .bind(Utc::now())
        .bind(challenge_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (token_id, user_id, org_id, token_hash, issued_utc, expiry_utc, revoked_utc, rotated_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(token.org_id)
        .bind(&token.token_hash)
        .bind(token.issued_utc)
        .bind(token.expiry_utc)
        .bind(token.revoked_utc)
        .bind(token.rotated_from)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = $1
             WHERE token_id = $2 AND revoked_utc IS NULL",
        )
        .bind(Utc::now())
        .bind(old_token_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (token_id, user_id, org_id, token_hash, issued_utc, expiry_utc, revoked_utc, rotated_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(successor.token_id)
        .bind(successor.user_id)
        .bind(successor.org_id)
        .bind(&successor.token_hash)
        .bind(successor.issued_utc)
        .bind(successor.expiry_utc)
        .bind(successor.revoked_utc)
        .bind(successor.rotated_from)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn revoke_refresh_chain(&self, user_id: Uuid, org_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = $1
             WHERE user_id = $2 AND org_id = $3 AND revoked_utc IS NULL",
        )
        .bind(Utc::now())
        .bind(user_id)
        .bind(org_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // ==================== Tasks ====================

    async fn insert_task(&self, task: &Task) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, org_id, title, description, status_code, assignee_id, due_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.task_id)
        .bind(task.org_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.status_code)
        .bind(task.assignee_id)
        .bind(task.due_utc)
        .bind(task.created_utc)
        .bind(task.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_tasks(&self, org_id: Uuid) -> Result<Vec<Task>, AppError> {
        sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE org_id = $1 ORDER BY created_utc ASC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn find_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE org_id = $1 AND task_id = $2")
            .bind(org_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn update_task(&self, task: &Task) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET title = $1, description = $2, status_code = $3, assignee_id = $4,
                due_utc = $5, updated_utc = $6
            WHERE org_id = $7 AND task_id = $8
            "#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.status_code)
        .bind(task.assignee_id)
        .bind(task.due_utc)
        .bind(task.updated_utc)
        .bind(task.org_id)
        .bind(task.task_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError> {
        sqlx::query_as::<_, Task>(
            "DELETE FROM tasks WHERE org_id = $1 AND task_id = $2 RETURNING *",
        )
        .bind(org_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }
}
