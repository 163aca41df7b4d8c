//! Tenant context middleware.
//!
//! Runs after authentication: hands the validated claims (authoritative) and
//! the Host header to the resolver chain and attaches the resulting
//! [`OrgContext`] to the request. No handler behind this middleware runs
//! without a resolved org.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use service_core::error::AppError;

use crate::AppState;
use crate::services::{AccessTokenClaims, OrgContext};

pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req.extensions().get::<AccessTokenClaims>().cloned();
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let ctx = state
        .tenants
        .resolve(claims.as_ref(), host.as_deref())
        .await?;

    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Extractor for the resolved tenant context.
#[axum::async_trait]
impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OrgContext>()
            .cloned()
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Tenant context not found")))
    }
}
