//! In-memory backend for the [`Store`] trait.
//!
//! Backs the test suite and databaseless local runs. All tables live behind
//! one async mutex, so each trait call is a single critical section; the CAS
//! operations therefore keep the same exactly-one-winner semantics as the
//! conditional UPDATEs in the Postgres backend.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Membership, Organization, OtpChallenge, RefreshToken, Task, User};
use crate::store::Store;

#[derive(Default)]
struct Tables {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    memberships: Vec<Membership>,
    otp_challenges: HashMap<Uuid, OtpChallenge>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    tasks: HashMap<Uuid, Task>,
}

#[derive(Clone, Default)]
pub struct MemStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    // ==================== Organizations ====================

    async fn insert_organization(&self, org: &Organization) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.organizations.insert(org.org_id, org.clone());
        Ok(())
    }

    async fn find_org_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.organizations.get(&org_id).cloned())
    }

    async fn find_org_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Organization>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .organizations
            .values()
            .find(|o| o.subdomain.eq_ignore_ascii_case(subdomain))
            .cloned())
    }

    // ==================== Users ====================

    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    // ==================== Memberships ====================

    async fn insert_membership(&self, membership: &Membership) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.memberships.push(membership.clone());
        Ok(())
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.org_id == org_id)
            .cloned())
    }

    async fn find_first_membership(&self, user_id: Uuid) -> Result<Option<Membership>, AppError> {
        let tables = self.tables.lock().await;
        let mut found: Option<&Membership> = None;
        for m in tables.memberships.iter().filter(|m| m.user_id == user_id) {
            let created = tables.organizations.get(&m.org_id).map(|o| o.created_utc);
            let best = found
                .and_then(|f| tables.organizations.get(&f.org_id))
                .map(|o| o.created_utc);
            if found.is_none() || created < best {
                found = Some(m);
            }
        }
        Ok(found.cloned())
    }

    // ==================== OTP challenges ====================

    async fn insert_otp_challenge(&self, challenge: &OtpChallenge) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables
            .otp_challenges
            .insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn find_otp_challenge(
        &self,
        challenge_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.otp_challenges.get(&challenge_id).cloned())
    }

    async fn find_latest_otp_challenge_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<OtpChallenge>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .otp_challenges
            .values()
            .filter(|c| c.user_id == user_id && c.consumed_utc.is_none())
            .max_by_key(|c| c.created_utc)
            .cloned())
    }

    async fn consume_otp_challenge(&self, challenge_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.otp_challenges.get_mut(&challenge_id) {
            Some(challenge) if challenge.consumed_utc.is_none() => {
                challenge.consumed_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.refresh_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool, AppError> {
        // Revoke-and-insert under one lock: the losing caller can only
        // observe the revocation after the successor exists.
        let mut tables = self.tables.lock().await;
        match tables.refresh_tokens.get_mut(&old_token_id) {
            Some(token) if token.revoked_utc.is_none() => {
                token.revoked_utc = Some(Utc::now());
                tables
                    .refresh_tokens
                    .insert(successor.token_id, successor.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_chain(&self, user_id: Uuid, org_id: Uuid) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for token in tables.refresh_tokens.values_mut() {
            if token.user_id == user_id && token.org_id == org_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    // ==================== Tasks ====================

    async fn insert_task(&self, task: &Task) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn list_tasks(&self, org_id: Uuid) -> Result<Vec<Task>, AppError> {
        let tables = self.tables.lock().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .values()
            .filter(|t| t.org_id == org_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_utc);
        Ok(tasks)
    }

    async fn find_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .get(&task_id)
            .filter(|t| t.org_id == org_id)
            .cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.tasks.get_mut(&task.task_id) {
            if existing.org_id == task.org_id {
                *existing = task.clone();
            }
        }
        Ok(())
    }

    async fn delete_task(&self, org_id: Uuid, task_id: Uuid) -> Result<Option<Task>, AppError> {
        let mut tables = self.tables.lock().await;
        let matches = tables
            .tasks
            .get(&task_id)
            .map(|t| t.org_id == org_id)
            .unwrap_or(false);
        if matches {
            Ok(tables.tasks.remove(&task_id))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[tokio::test]
    async fn otp_consumption_happens_once() {
        let store = MemStore::new();
        let challenge = OtpChallenge::new(Uuid::new_v4(), "hash".to_string(), 10);
        store.insert_otp_challenge(&challenge).await.unwrap();

        assert!(store
            .consume_otp_challenge(challenge.challenge_id)
            .await
            .unwrap());
        assert!(!store
            .consume_otp_challenge(challenge.challenge_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rotation_happens_once_and_publishes_the_successor() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let token = RefreshToken::new(user, org, "h".to_string(), 7, None);
        store.insert_refresh_token(&token).await.unwrap();

        let first = RefreshToken::new(user, org, "h2".to_string(), 7, Some(token.token_id));
        let second = RefreshToken::new(user, org, "h3".to_string(), 7, Some(token.token_id));

        assert!(store
            .rotate_refresh_token(token.token_id, &first)
            .await
            .unwrap());
        assert!(!store
            .rotate_refresh_token(token.token_id, &second)
            .await
            .unwrap());

        // Winner's successor is stored, loser's is not
        assert!(store.find_refresh_token_by_hash("h2").await.unwrap().is_some());
        assert!(store.find_refresh_token_by_hash("h3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_revocation_is_scoped_to_org() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        let in_a = RefreshToken::new(user, org_a, "a".to_string(), 7, None);
        let in_b = RefreshToken::new(user, org_b, "b".to_string(), 7, None);
        store.insert_refresh_token(&in_a).await.unwrap();
        store.insert_refresh_token(&in_b).await.unwrap();

        assert_eq!(store.revoke_refresh_chain(user, org_a).await.unwrap(), 1);

        let survivor = store.find_refresh_token_by_hash("b").await.unwrap().unwrap();
        assert!(survivor.revoked_utc.is_none());
    }

    #[tokio::test]
    async fn task_lookup_never_crosses_orgs() {
        let store = MemStore::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let task = Task::new(org_a, "t".to_string(), None, TaskStatus::Todo, None, None);
        store.insert_task(&task).await.unwrap();

        assert!(store.find_task(org_b, task.task_id).await.unwrap().is_none());
        assert!(store.delete_task(org_b, task.task_id).await.unwrap().is_none());
        assert!(store.find_task(org_a, task.task_id).await.unwrap().is_some());
    }
}
