//! Credential store: password verification with attempt limiting.

use service_core::middleware::rate_limit::{AttemptRateLimiter, check_attempt};
use std::sync::Arc;

use crate::models::User;
use crate::services::ServiceError;
use crate::store::Store;
use crate::utils::{Password, PasswordHashString, dummy_verify, verify_password};

/// Verifies identity and rate-limits attempts. Leaf component: depends only
/// on the store and the attempt counter.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn Store>,
    attempts: AttemptRateLimiter,
}

impl CredentialService {
    pub fn new(store: Arc<dyn Store>, attempts: AttemptRateLimiter) -> Self {
        Self { store, attempts }
    }

    /// Verify an email/password pair, keyed by (email, source) for attempt
    /// counting. The window check runs before any hash work so a flooding
    /// caller cannot amplify into expensive comparisons.
    pub async fn verify(
        &self,
        email: &str,
        password: &str,
        source: &str,
    ) -> Result<User, ServiceError> {
        let key = format!("{}|{}", email.to_lowercase(), source);
        if let Err(retry_after_seconds) = check_attempt(&self.attempts, &key) {
            tracing::warn!(email = %email, source = %source, "Login attempt rate limited");
            return Err(ServiceError::RateLimited {
                retry_after_seconds,
            });
        }

        let password = Password::new(password.to_string());

        let user = self
            .store
            .find_user_by_email(email)
            .await
            .map_err(ServiceError::storage)?;

        let user = match user {
            Some(user) => user,
            None => {
                dummy_verify(&password);
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let hash = match &user.password_hash {
            Some(hash) => PasswordHashString::new(hash.clone()),
            None => {
                // Externally-provisioned account with no local password.
                dummy_verify(&password);
                return Err(ServiceError::InvalidCredentials);
            }
        };

        verify_password(&password, &hash).map_err(|_| ServiceError::InvalidCredentials)?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::utils::hash_password;
    use service_core::middleware::rate_limit::create_attempt_rate_limiter;

    async fn store_with_user(email: &str, password: &str) -> Arc<dyn Store> {
        let store = MemStore::new();
        let hash = hash_password(&Password::new(password.to_string())).unwrap();
        let user = crate::models::User::new(email.to_string(), Some(hash.into_string()));
        store.insert_user(&user).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn correct_password_verifies() {
        let store = store_with_user("admin@acme.com", "admin123").await;
        let service = CredentialService::new(store, create_attempt_rate_limiter(5, 300));

        let user = service
            .verify("admin@acme.com", "admin123", "127.0.0.1")
            .await
            .unwrap();
        assert_eq!(user.email, "admin@acme.com");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_identically() {
        let store = store_with_user("admin@acme.com", "admin123").await;
        let service = CredentialService::new(store, create_attempt_rate_limiter(5, 300));

        let wrong = service
            .verify("admin@acme.com", "nope", "127.0.0.1")
            .await
            .unwrap_err();
        let unknown = service
            .verify("ghost@acme.com", "nope", "127.0.0.1")
            .await
            .unwrap_err();

        assert!(matches!(wrong, ServiceError::InvalidCredentials));
        assert!(matches!(unknown, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn attempts_beyond_window_are_limited_without_hashing() {
        let store = store_with_user("admin@acme.com", "admin123").await;
        let service = CredentialService::new(store, create_attempt_rate_limiter(2, 300));

        let _ = service.verify("admin@acme.com", "a", "10.0.0.1").await;
        let _ = service.verify("admin@acme.com", "b", "10.0.0.1").await;

        let err = service
            .verify("admin@acme.com", "admin123", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));

        // A different source keeps its own window
        assert!(service
            .verify("admin@acme.com", "admin123", "10.0.0.2")
            .await
            .is_ok());
    }
}
