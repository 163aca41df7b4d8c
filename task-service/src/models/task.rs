//! Task model - the record carried in full by every published event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(code: &str) -> Option<TaskStatus> {
        match code {
            "todo" => Some(TaskStatus::Todo),
            "doing" => Some(TaskStatus::Doing),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Task {
    pub task_id: Uuid,
    pub org_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status_code: String,
    pub assignee_id: Option<Uuid>,
    pub due_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Task {
    pub fn new(
        org_id: Uuid,
        title: String,
        description: Option<String>,
        status: TaskStatus,
        assignee_id: Option<Uuid>,
        due_utc: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            org_id,
            title,
            description,
            status_code: status.as_str().to_string(),
            assignee_id,
            due_utc,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status_code).unwrap_or(TaskStatus::Todo)
    }
}
