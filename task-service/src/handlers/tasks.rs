//! Task CRUD handlers, the mutation collaborator that feeds the event
//! router. Every successful mutation publishes to the org channel
//! synchronously before returning; delivery past that point is
//! fire-and-forget.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use service_core::error::AppError;

use crate::AppState;
use crate::dtos::task::{CreateTaskRequest, TaskListResponse, UpdateTaskRequest};
use crate::middleware::AuthUser;
use crate::models::{Role, Task, TaskStatus};
use crate::realtime::ServerEvent;
use crate::services::{OrgContext, ServiceError};
use crate::store::Store;
use crate::utils::ValidatedJson;

pub async fn list_tasks(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: OrgContext,
) -> Result<impl IntoResponse, AppError> {
    let tasks = state.store.list_tasks(ctx.org_id).await?;
    Ok(Json(TaskListResponse { tasks }))
}

pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ctx: OrgContext,
    ValidatedJson(req): ValidatedJson<CreateTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    let task = Task::new(
        ctx.org_id,
        req.title,
        req.description,
        req.status.unwrap_or(TaskStatus::Todo),
        req.assignee_id,
        req.due_utc,
    );

    state.store.insert_task(&task).await?;

    state.events.publish(
        ctx.org_id,
        ServerEvent::TaskCreated {
            org_id: ctx.org_id,
            user_id: Some(claims.sub),
            task: task.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    _user: AuthUser,
    ctx: OrgContext,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let task = state
        .store
        .find_task(ctx.org_id, task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Task".to_string()))?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ctx: OrgContext,
    Path(task_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut task = state
        .store
        .find_task(ctx.org_id, task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Task".to_string()))?;

    require_can_modify(claims.role(), claims.sub, &task)?;

    if let Some(title) = req.title {
        task.title = title;
    }
    if let Some(description) = req.description {
        task.description = Some(description);
    }
    if let Some(status) = req.status {
        task.status_code = status.as_str().to_string();
    }
    if let Some(assignee_id) = req.assignee_id {
        task.assignee_id = Some(assignee_id);
    }
    if let Some(due_utc) = req.due_utc {
        task.due_utc = Some(due_utc);
    }
    task.updated_utc = Utc::now();

    state.store.update_task(&task).await?;

    state.events.publish(
        ctx.org_id,
        ServerEvent::TaskUpdated {
            org_id: ctx.org_id,
            user_id: Some(claims.sub),
            task: task.clone(),
        },
    );

    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ctx: OrgContext,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let task = state
        .store
        .find_task(ctx.org_id, task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Task".to_string()))?;

    require_can_modify(claims.role(), claims.sub, &task)?;

    let deleted = state
        .store
        .delete_task(ctx.org_id, task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Task".to_string()))?;

    state.events.publish(
        ctx.org_id,
        ServerEvent::TaskDeleted {
            org_id: ctx.org_id,
            user_id: Some(claims.sub),
            task: deleted,
        },
    );

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Task deleted successfully"
        })),
    ))
}

/// Admins modify anything; members only tasks assigned to them.
fn require_can_modify(role: Role, user_id: Uuid, task: &Task) -> Result<(), ServiceError> {
    if role == Role::Admin || task.assignee_id == Some(user_id) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized {
            required: Role::Admin,
        })
    }
}
