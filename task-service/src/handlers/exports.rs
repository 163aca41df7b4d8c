//! Export hand-off handlers: authorize, enqueue, and org-scoped status.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use service_core::error::AppError;

use crate::AppState;
use crate::dtos::task::ExportJobResponse;
use crate::middleware::AuthUser;
use crate::services::OrgContext;

pub async fn create_export(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ctx: OrgContext,
) -> Result<impl IntoResponse, AppError> {
    let job = state
        .exports
        .enqueue(ctx.org_id, &ctx.subdomain, claims.sub, claims.role())?;

    Ok((StatusCode::ACCEPTED, Json(ExportJobResponse { job })))
}

pub async fn get_export(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: OrgContext,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.exports.status(ctx.org_id, job_id)?;
    Ok(Json(ExportJobResponse { job }))
}
