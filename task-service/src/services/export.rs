//! CSV export hand-off.
//!
//! The core validates the requester's authorization and enqueues a job keyed
//! by org + requester; generation runs on an in-process worker. Callers
//! never see queue internals, only enqueue and org-scoped status lookup.

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ExportJob, ExportState, Role, Task};
use crate::services::ServiceError;
use crate::store::Store;

#[derive(Clone)]
pub struct ExportService {
    store: Arc<dyn Store>,
    jobs: Arc<DashMap<Uuid, ExportJob>>,
    export_dir: PathBuf,
}

impl ExportService {
    pub fn new(store: Arc<dyn Store>, export_dir: PathBuf) -> Self {
        Self {
            store,
            jobs: Arc::new(DashMap::new()),
            export_dir,
        }
    }

    /// Enqueue a CSV export of the organization's tasks. Admin only.
    pub fn enqueue(
        &self,
        org_id: Uuid,
        subdomain: &str,
        requested_by: Uuid,
        role: Role,
    ) -> Result<ExportJob, ServiceError> {
        if role != Role::Admin {
            return Err(ServiceError::Unauthorized {
                required: Role::Admin,
            });
        }

        let job = ExportJob::new(org_id, requested_by);
        self.jobs.insert(job.job_id, job.clone());

        let store = Arc::clone(&self.store);
        let jobs = Arc::clone(&self.jobs);
        let export_dir = self.export_dir.clone();
        let subdomain = subdomain.to_string();
        let job_id = job.job_id;

        tokio::spawn(async move {
            set_state(&jobs, job_id, ExportState::Running, None, None);

            match run_export(store, &export_dir, org_id, &subdomain).await {
                Ok((file_name, row_count)) => {
                    tracing::info!(job_id = %job_id, file = %file_name, rows = row_count, "Export completed");
                    set_state(
                        &jobs,
                        job_id,
                        ExportState::Done,
                        Some(file_name),
                        Some(row_count),
                    );
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Export failed");
                    set_state(&jobs, job_id, ExportState::Failed, None, None);
                }
            }
        });

        Ok(job)
    }

    /// Look up a job, scoped to the caller's org. A job belonging to another
    /// org is indistinguishable from a missing one.
    pub fn status(&self, org_id: Uuid, job_id: Uuid) -> Result<ExportJob, ServiceError> {
        self.jobs
            .get(&job_id)
            .filter(|job| job.org_id == org_id)
            .map(|job| job.clone())
            .ok_or_else(|| ServiceError::NotFound("Export job".to_string()))
    }
}

fn set_state(
    jobs: &DashMap<Uuid, ExportJob>,
    job_id: Uuid,
    state: ExportState,
    file_name: Option<String>,
    row_count: Option<usize>,
) {
    if let Some(mut job) = jobs.get_mut(&job_id) {
        job.state = state;
        if file_name.is_some() {
            job.file_name = file_name;
        }
        if row_count.is_some() {
            job.row_count = row_count;
        }
    }
}

async fn run_export(
    store: Arc<dyn Store>,
    export_dir: &PathBuf,
    org_id: Uuid,
    subdomain: &str,
) -> Result<(String, usize), anyhow::Error> {
    let tasks = store.list_tasks(org_id).await.map_err(|e| anyhow::anyhow!(e))?;

    let file_name = format!("{}_{}.csv", subdomain, Utc::now().format("%Y%m%d_%H%M%S"));
    let path = export_dir.join(&file_name);

    tokio::fs::create_dir_all(export_dir).await?;
    tokio::fs::write(&path, render_csv(&tasks)).await?;

    Ok((file_name, tasks.len()))
}

fn render_csv(tasks: &[Task]) -> String {
    let mut out =
        String::from("task_id,title,description,status,assignee_id,due_utc,created_utc,updated_utc\n");
    for task in tasks {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            task.task_id,
            csv_field(&task.title),
            csv_field(task.description.as_deref().unwrap_or("")),
            task.status_code,
            task.assignee_id.map(|a| a.to_string()).unwrap_or_default(),
            task.due_utc.map(|d| d.to_rfc3339()).unwrap_or_default(),
            task.created_utc.to_rfc3339(),
            task.updated_utc.to_rfc3339(),
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::store::MemStore;
    use std::time::Duration;

    #[test]
    fn csv_fields_are_escaped() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn non_admin_cannot_enqueue() {
        let service = ExportService::new(
            Arc::new(MemStore::new()),
            std::env::temp_dir().join("exports-test"),
        );

        let err = service
            .enqueue(Uuid::new_v4(), "acme", Uuid::new_v4(), Role::Member)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Unauthorized {
                required: Role::Admin
            }
        ));
    }

    #[tokio::test]
    async fn export_writes_org_scoped_rows() {
        let store = Arc::new(MemStore::new());
        let org = Uuid::new_v4();
        let other_org = Uuid::new_v4();

        let mine = Task::new(org, "ours".to_string(), None, TaskStatus::Todo, None, None);
        let theirs = Task::new(
            other_org,
            "theirs".to_string(),
            None,
            TaskStatus::Todo,
            None,
            None,
        );
        store.insert_task(&mine).await.unwrap();
        store.insert_task(&theirs).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(store.clone(), dir.path().to_path_buf());

        let job = service
            .enqueue(org, "acme", Uuid::new_v4(), Role::Admin)
            .unwrap();

        // Worker is fire-and-forget; poll until it settles
        let mut state = ExportState::Queued;
        for _ in 0..50 {
            state = service.status(org, job.job_id).unwrap().state;
            if state == ExportState::Done || state == ExportState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, ExportState::Done);

        let done = service.status(org, job.job_id).unwrap();
        assert_eq!(done.row_count, Some(1));

        let content =
            std::fs::read_to_string(dir.path().join(done.file_name.unwrap())).unwrap();
        assert!(content.contains("ours"));
        assert!(!content.contains("theirs"));

        // Status is org-scoped
        assert!(service.status(other_org, job.job_id).is_err());
    }
}
