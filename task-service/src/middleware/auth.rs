use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};

use service_core::error::AppError;

use crate::AppState;
use crate::services::AccessTokenClaims;

/// Middleware to require authentication. Validation is pure computation
/// against the token signature and expiry; there is no revocation lookup for
/// access tokens.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = token.ok_or_else(|| {
        AppError::AuthError(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let claims = state.tokens.validate(token)?;

    // Store claims in request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor to easily get claims in handlers
pub struct AuthUser(pub AccessTokenClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<AccessTokenClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Auth claims missing from request extensions"))
        })?;

        Ok(AuthUser(claims.clone()))
    }
}
