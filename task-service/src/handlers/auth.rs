//! Authentication handlers: registration, password login, OTP completion,
//! refresh rotation, logout.

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use std::net::SocketAddr;

use service_core::error::AppError;

use crate::AppState;
use crate::dtos::auth::{
    LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RegisterRequest, VerifyOtpRequest,
};
use crate::services::subdomain_from_host;
use crate::utils::ValidatedJson;

/// Register a new organization with its admin user. Like login, this never
/// yields tokens directly; the OTP step is mandatory for every session.
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let grant = state
        .tokens
        .register(&req.organization_name, &req.subdomain, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            otp_required: true,
            challenge_id: grant.challenge_id,
        }),
    ))
}

/// Password login. Success means an OTP challenge was issued.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let source = client_source(&headers, addr);
    let grant = state.tokens.login(&req.email, &req.password, &source).await?;

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            otp_required: true,
            challenge_id: grant.challenge_id,
        }),
    ))
}

/// Complete the OTP step and receive the session's first token pair. The
/// request's subdomain, when present, selects the organization to bind.
pub async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subdomain = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(subdomain_from_host);

    let tokens = state
        .tokens
        .complete_otp(
            req.challenge_id,
            req.email.as_deref(),
            &req.code,
            subdomain.as_deref(),
        )
        .await?;

    Ok((StatusCode::OK, Json(tokens)))
}

/// Rotate a refresh token pair.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.tokens.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Revoke a refresh token chain. Idempotent: always succeeds.
pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.tokens.logout(&req.refresh_token).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Logged out successfully"
        })),
    ))
}

/// Attempt-counter source key: the first forwarded address when behind a
/// proxy, the peer address otherwise.
fn client_source(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}
