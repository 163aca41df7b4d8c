//! Tenant resolver: maps request context to an organization.
//!
//! Resolution is an explicit, ordered chain rather than per-call-site
//! branching: an org claim in a validated access token is authoritative;
//! subdomain lookup applies only before authentication (login, fresh
//! real-time connects with no other determinant).

use std::sync::Arc;
use uuid::Uuid;

use crate::services::{AccessTokenClaims, ServiceError};
use crate::store::Store;

/// Resolved tenant context attached to every downstream query.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub org_id: Uuid,
    pub subdomain: String,
}

#[derive(Clone)]
pub struct TenantService {
    store: Arc<dyn Store>,
}

impl TenantService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the organization for a request. Claim first, subdomain second;
    /// no match is `UnknownTenant` and nothing downstream proceeds.
    pub async fn resolve(
        &self,
        claims: Option<&AccessTokenClaims>,
        host: Option<&str>,
    ) -> Result<OrgContext, ServiceError> {
        if let Some(claims) = claims {
            let org = self
                .store
                .find_org_by_id(claims.org_id)
                .await
                .map_err(ServiceError::storage)?
                .ok_or(ServiceError::UnknownTenant)?;
            return Ok(OrgContext {
                org_id: org.org_id,
                subdomain: org.subdomain,
            });
        }

        if let Some(subdomain) = host.and_then(subdomain_from_host) {
            let org = self
                .store
                .find_org_by_subdomain(&subdomain)
                .await
                .map_err(ServiceError::storage)?
                .ok_or(ServiceError::UnknownTenant)?;
            return Ok(OrgContext {
                org_id: org.org_id,
                subdomain: org.subdomain,
            });
        }

        Err(ServiceError::UnknownTenant)
    }

    /// Subdomain-only resolution, used where a token claim can never exist
    /// (pre-auth flows).
    pub async fn resolve_subdomain(&self, subdomain: &str) -> Result<OrgContext, ServiceError> {
        let org = self
            .store
            .find_org_by_subdomain(subdomain)
            .await
            .map_err(ServiceError::storage)?
            .ok_or(ServiceError::UnknownTenant)?;
        Ok(OrgContext {
            org_id: org.org_id,
            subdomain: org.subdomain,
        })
    }
}

/// Extract a candidate tenant subdomain from a Host header value.
pub fn subdomain_from_host(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    if !host.contains('.') {
        return None;
    }
    let label = host.split('.').next().unwrap_or("");
    if label.is_empty() || label.eq_ignore_ascii_case("www") {
        return None;
    }
    Some(label.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Organization;
    use crate::services::JwtService;
    use crate::store::MemStore;

    #[test]
    fn host_parsing_rules() {
        assert_eq!(
            subdomain_from_host("acme.example.local:3000"),
            Some("acme".to_string())
        );
        assert_eq!(subdomain_from_host("ACME.example.local"), Some("acme".to_string()));
        assert_eq!(subdomain_from_host("www.example.local"), None);
        assert_eq!(subdomain_from_host("localhost"), None);
        assert_eq!(subdomain_from_host("localhost:8080"), None);
    }

    #[tokio::test]
    async fn claim_takes_precedence_over_subdomain() {
        let store = Arc::new(MemStore::new());
        let by_claim = Organization::new("claimed".to_string(), "Claimed".to_string());
        let by_host = Organization::new("hosted".to_string(), "Hosted".to_string());
        store.insert_organization(&by_claim).await.unwrap();
        store.insert_organization(&by_host).await.unwrap();

        let jwt = JwtService::new(&crate::config::JwtConfig {
            secret: "s".to_string(),
            issuer: "task-service".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        });
        let token = jwt
            .generate_access_token(Uuid::new_v4(), by_claim.org_id, crate::models::Role::Member)
            .unwrap();
        let claims = jwt.validate_access_token(&token).unwrap();

        let service = TenantService::new(store);
        let ctx = service
            .resolve(Some(&claims), Some("hosted.example.local"))
            .await
            .unwrap();
        assert_eq!(ctx.org_id, by_claim.org_id);
    }

    #[tokio::test]
    async fn unknown_subdomain_is_rejected() {
        let store = Arc::new(MemStore::new());
        let service = TenantService::new(store);

        let err = service
            .resolve(None, Some("ghost.example.local"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownTenant));

        let err = service.resolve(None, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownTenant));
    }
}
