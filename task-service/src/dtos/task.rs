use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{ExportJob, TaskStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: String,

    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub due_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: Option<String>,

    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub due_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<crate::models::Task>,
}

#[derive(Debug, Serialize)]
pub struct ExportJobResponse {
    pub job: ExportJob,
}
