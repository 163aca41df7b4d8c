//! Export job model. Jobs live in the in-process queue only; the queue
//! internals stay behind the export service boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub job_id: Uuid,
    pub org_id: Uuid,
    pub requested_by: Uuid,
    pub state: ExportState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    pub created_utc: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(org_id: Uuid, requested_by: Uuid) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            org_id,
            requested_by,
            state: ExportState::Queued,
            file_name: None,
            row_count: None,
            created_utc: Utc::now(),
        }
    }
}
