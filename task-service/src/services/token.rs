//! Token service: session establishment, validation, rotation, teardown.
//!
//! Login never yields tokens; it yields an OTP challenge. The challenge,
//! once consumed, mints the first refresh token of a rotation chain. Every
//! refresh revokes its predecessor via CAS and links the successor through
//! `rotated_from`; presenting an absent or already-revoked token kills the
//! whole chain.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{Membership, Organization, RefreshToken, Role, User};
use crate::services::{
    AccessTokenClaims, CredentialService, JwtService, OtpService, ServiceError, TokenResponse,
};
use crate::store::Store;
use crate::utils::{Password, hash_password};

/// Outcome of `login`/`register`: always a step-up challenge, never tokens.
#[derive(Debug)]
pub struct LoginGrant {
    pub challenge_id: Uuid,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
    jwt: JwtService,
    credentials: CredentialService,
    otp: OtpService,
    refresh_expiry_days: i64,
    storage_timeout: Duration,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn Store>,
        jwt: JwtService,
        credentials: CredentialService,
        otp: OtpService,
        refresh_expiry_days: i64,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            jwt,
            credentials,
            otp,
            refresh_expiry_days,
            storage_timeout,
        }
    }

    /// Bound a storage-backed step; past the bound the caller gets a
    /// retryable error instead of hanging.
    async fn timed<T, F>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.storage_timeout, op).await {
            Ok(result) => result.map_err(ServiceError::storage),
            Err(_) => Err(ServiceError::StorageTimeout),
        }
    }

    /// Same bound for steps that already speak `ServiceError`.
    async fn timed_svc<T, F>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.storage_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::StorageTimeout),
        }
    }

    /// Password login. On success an OTP challenge is issued; tokens only
    /// come from `complete_otp`.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        source: &str,
    ) -> Result<LoginGrant, ServiceError> {
        let user = self.credentials.verify(email, password, source).await?;
        let challenge_id = self.otp.issue(&user).await?;
        Ok(LoginGrant { challenge_id })
    }

    /// Create an organization with its admin user, then enter the same OTP
    /// gate as login.
    pub async fn register(
        &self,
        organization_name: &str,
        subdomain: &str,
        email: &str,
        password: &str,
    ) -> Result<LoginGrant, ServiceError> {
        if self
            .timed(self.store.find_org_by_subdomain(subdomain))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Subdomain already exists".to_string()));
        }
        if self
            .timed(self.store.find_user_by_email(email))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let password_hash = hash_password(&Password::new(password.to_string()))
            .map_err(ServiceError::Internal)?;

        let org = Organization::new(subdomain.to_lowercase(), organization_name.to_string());
        let user = User::new(email.to_lowercase(), Some(password_hash.into_string()));
        let membership = Membership::new(user.user_id, org.org_id, Role::Admin);

        self.timed(self.store.insert_organization(&org)).await?;
        self.timed(self.store.insert_user(&user)).await?;
        self.timed(self.store.insert_membership(&membership)).await?;

        tracing::info!(org_id = %org.org_id, user_id = %user.user_id, "Organization registered");

        let challenge_id = self.otp.issue(&user).await?;
        Ok(LoginGrant { challenge_id })
    }

    /// Complete the OTP step and mint the session's first token pair, bound
    /// to the resolved organization.
    pub async fn complete_otp(
        &self,
        challenge_id: Option<Uuid>,
        email: Option<&str>,
        code: &str,
        subdomain: Option<&str>,
    ) -> Result<TokenResponse, ServiceError> {
        let challenge = self
            .timed_svc(self.otp.verify(challenge_id, email, code))
            .await?;

        let user = self
            .timed(self.store.find_user_by_id(challenge.user_id))
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        let membership = match subdomain {
            Some(subdomain) => {
                let org = self
                    .timed(self.store.find_org_by_subdomain(subdomain))
                    .await?
                    .ok_or(ServiceError::UnknownTenant)?;
                self.timed(self.store.find_membership(user.user_id, org.org_id))
                    .await?
                    .ok_or(ServiceError::Unauthorized {
                        required: Role::Member,
                    })?
            }
            None => self
                .timed(self.store.find_first_membership(user.user_id))
                .await?
                .ok_or(ServiceError::UnknownTenant)?,
        };

        self.issue_pair(user.user_id, membership.org_id, membership.role())
            .await
    }

    /// Rotate a refresh token.
    ///
    /// Exactly one concurrent caller per token can win the CAS. Everyone
    /// else, including anyone presenting an absent or already-revoked
    /// token, gets `TokenReuseDetected` after the chain is revoked
    /// server-side.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        let hash = hash_token(refresh_token);

        let stored = self
            .timed(self.store.find_refresh_token_by_hash(&hash))
            .await?;

        let stored = match stored {
            // Unknown token: nothing to revoke, but the caller learns nothing
            // beyond "reuse".
            None => return Err(ServiceError::TokenReuseDetected),
            Some(stored) if stored.is_revoked() => {
                tracing::warn!(
                    user_id = %stored.user_id,
                    org_id = %stored.org_id,
                    token_id = %stored.token_id,
                    "Revoked refresh token presented; revoking chain"
                );
                self.timed(
                    self.store
                        .revoke_refresh_chain(stored.user_id, stored.org_id),
                )
                .await?;
                return Err(ServiceError::TokenReuseDetected);
            }
            Some(stored) => stored,
        };

        if stored.is_expired() {
            return Err(ServiceError::TokenExpired);
        }

        let membership = self
            .timed(self.store.find_membership(stored.user_id, stored.org_id))
            .await?
            .ok_or(ServiceError::TokenRevoked)?;

        // The correctness-critical section: mark-and-mint is one atomic
        // storage step, and only the winner's successor is written.
        let refresh_token = generate_refresh_token();
        let successor = RefreshToken::new(
            stored.user_id,
            stored.org_id,
            hash_token(&refresh_token),
            self.refresh_expiry_days,
            Some(stored.token_id),
        );

        let won = self
            .timed(self.store.rotate_refresh_token(stored.token_id, &successor))
            .await?;
        if !won {
            // Lost the race: someone else rotated this token concurrently.
            // Their successor is already visible, so chain revocation kills it.
            self.timed(
                self.store
                    .revoke_refresh_chain(stored.user_id, stored.org_id),
            )
            .await?;
            return Err(ServiceError::TokenReuseDetected);
        }

        let access_token =
            self.jwt
                .generate_access_token(stored.user_id, stored.org_id, membership.role())?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }

    /// Validate an access token. Pure computation, no storage access.
    pub fn validate(&self, access_token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.jwt.validate_access_token(access_token)
    }

    /// Revoke the presented token's whole chain. Idempotent: succeeds even
    /// for unknown or already-revoked tokens.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        let hash = hash_token(refresh_token);

        if let Some(stored) = self
            .timed(self.store.find_refresh_token_by_hash(&hash))
            .await?
        {
            let revoked = self
                .timed(
                    self.store
                        .revoke_refresh_chain(stored.user_id, stored.org_id),
                )
                .await?;
            tracing::info!(user_id = %stored.user_id, revoked, "User logged out");
        }

        Ok(())
    }

    /// Mint the first pair of a fresh chain (OTP completion).
    async fn issue_pair(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Role,
    ) -> Result<TokenResponse, ServiceError> {
        let access_token = self.jwt.generate_access_token(user_id, org_id, role)?;

        let refresh_token = generate_refresh_token();
        let record = RefreshToken::new(
            user_id,
            org_id,
            hash_token(&refresh_token),
            self.refresh_expiry_days,
            None,
        );
        self.timed(self.store.insert_refresh_token(&record)).await?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
        })
    }
}

/// Opaque 256-bit refresh token.
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Refresh tokens are stored only as SHA-256 hashes.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_unique_and_opaque() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_hash_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
