use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Role;
use crate::services::ServiceError;

/// JWT service for access-token generation and validation.
///
/// Validation is pure computation: no storage access, so access tokens cannot
/// be revoked server-side. Their short lifetime bounds exposure.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_expiry_minutes: i64,
}

/// Claims for access tokens (short-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Organization the session is bound to
    pub org_id: Uuid,
    /// Role within that organization
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: Uuid,
    /// Issuer
    pub iss: String,
}

impl AccessTokenClaims {
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::Member)
    }
}

/// Token pair returned to the client.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
        }
    }

    /// Generate an access token bound to a user, organization, and role.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Role,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id,
            org_id,
            role: role.as_str().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
            iss: self.issuer.clone(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let token_data =
            decode::<AccessTokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        ServiceError::TokenSignatureInvalid
                    }
                    _ => ServiceError::TokenMalformed,
                }
            })?;

        Ok(token_data.claims)
    }

    /// Access token expiry in seconds (for client info).
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key".to_string(),
            issuer: "task-service".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        }
    }

    #[test]
    fn access_token_roundtrip() {
        let service = JwtService::new(&test_config());
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();

        let token = service
            .generate_access_token(user_id, org_id, Role::Admin)
            .unwrap();
        assert!(!token.is_empty());

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.org_id, org_id);
        assert_eq!(claims.role(), Role::Admin);
    }

    #[test]
    fn tampered_signature_is_rejected_as_signature_error() {
        let service = JwtService::new(&test_config());
        let other = JwtService::new(&JwtConfig {
            secret: "other-secret".to_string(),
            ..test_config()
        });

        let token = other
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), Role::Member)
            .unwrap();

        match service.validate_access_token(&token) {
            Err(ServiceError::TokenSignatureInvalid) => {}
            other => panic!("expected signature error, got {:?}", other.map(|c| c.jti)),
        }
    }

    #[test]
    fn garbage_token_is_malformed() {
        let service = JwtService::new(&test_config());
        match service.validate_access_token("not-a-jwt") {
            Err(ServiceError::TokenMalformed) => {}
            other => panic!("expected malformed error, got {:?}", other.map(|c| c.jti)),
        }
    }

    #[test]
    fn expired_token_is_rejected_with_zero_leeway() {
        let config = JwtConfig {
            access_token_expiry_minutes: 0,
            ..test_config()
        };
        let service = JwtService::new(&config);

        let token = service
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), Role::Member)
            .unwrap();

        // exp == iat, so one second later the token is already past expiry
        std::thread::sleep(std::time::Duration::from_millis(1100));
        match service.validate_access_token(&token) {
            Err(ServiceError::TokenExpired) => {}
            other => panic!("expected expiry error, got {:?}", other.map(|c| c.jti)),
        }
    }
}
