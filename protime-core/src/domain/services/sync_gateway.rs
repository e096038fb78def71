//! Best-effort bridge from engine events to the remote API.
//!
//! The remote API models statuses inconsistently across project and task
//! resources, so every state transition is expressed as an ordered chain of
//! plausible requests (see the `*_chain` functions) executed by
//! [`run_fallback`]. Nothing here ever fails the caller: outcomes are
//! reported as [`RemoteOutcome`] or `Option`, and failures are logged.

use std::{collections::HashSet, sync::Arc};

use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

use super::fallback::run_fallback;
use crate::domain::{
    models::{
        Decision, PendingSubmission, ProjectId, RemoteOutcome, TaskId, TimeSegment,
        WorkflowStatus, DEFAULT_TASK_NAME, UNKNOWN_PROJECT_NAME,
    },
    ports::outbound::{RemoteRequest, Transport},
};

const TIME_ENTRIES_PATH: &str = "/time-entries";
const SECONDS_PER_HOUR: f64 = 3600.0;

// ============================================================================
// Chains
// ============================================================================

fn status_body(status: WorkflowStatus) -> Value {
    json!({ "status": status.to_string() })
}

/// Set the status of a real task.
pub fn task_status_chain(
    project_id: &ProjectId,
    task_id: &TaskId,
    status: WorkflowStatus,
) -> Vec<RemoteRequest> {
    let body = status_body(status);
    vec![
        RemoteRequest::put(format!("/projects/{project_id}/tasks/{task_id}"), body.clone()),
        RemoteRequest::put(
            format!("/projects/{project_id}/tasks/{task_id}/status"),
            body.clone(),
        ),
        RemoteRequest::put(format!("/tasks/{task_id}/status"), body.clone()),
        RemoteRequest::post(format!("/tasks/{task_id}/status"), body),
    ]
}

/// Set the status of a whole project.
pub fn project_status_chain(project_id: &ProjectId, status: WorkflowStatus) -> Vec<RemoteRequest> {
    let body = status_body(status);
    vec![
        RemoteRequest::put(format!("/projects/{project_id}"), body.clone()),
        RemoteRequest::put(format!("/projects/{project_id}/status"), body.clone()),
        RemoteRequest::post(format!("/projects/{project_id}/status"), body),
    ]
}

/// Submit a real task for approval, settling for "Done" as a last resort.
pub fn submit_task_chain(project_id: &ProjectId, task_id: &TaskId) -> Vec<RemoteRequest> {
    let submitted = status_body(WorkflowStatus::Submitted);
    vec![
        RemoteRequest::put(
            format!("/projects/{project_id}/tasks/{task_id}"),
            submitted.clone(),
        ),
        RemoteRequest::put(format!("/tasks/{task_id}/status"), submitted.clone()),
        RemoteRequest::post(format!("/tasks/{task_id}/status"), submitted),
        RemoteRequest::put(
            format!("/projects/{project_id}/tasks/{task_id}"),
            status_body(WorkflowStatus::Done),
        ),
    ]
}

/// Submit a project-level virtual task: create a real submitted task, or
/// else mark the whole project submitted.
pub fn submit_virtual_chain(
    project_id: &ProjectId,
    task_name: &str,
    estimated_minutes: u32,
) -> Vec<RemoteRequest> {
    let create = RemoteRequest::post(
        format!("/projects/{project_id}/tasks"),
        json!({
            "name": task_name,
            "status": WorkflowStatus::Submitted.to_string(),
            "estimatedMinutes": estimated_minutes,
        }),
    );

    std::iter::once(create)
        .chain(project_status_chain(project_id, WorkflowStatus::Submitted))
        .collect()
}

/// Apply a supervisor decision: task-level endpoints first, then the project.
pub fn decision_chain(item: &PendingSubmission, decision: Decision) -> Vec<RemoteRequest> {
    let status = decision.target_status();
    let mut chain = match &item.task_id {
        Some(task_id) => task_status_chain(&item.project_id, task_id, status),
        None => Vec::new(),
    };
    chain.extend(project_status_chain(&item.project_id, status));
    chain
}

fn iso(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| instant.to_string())
}

/// Fetch the week's total: the timesheet summary, or else the raw entries.
pub fn weekly_hours_chain(week_start: Date) -> Vec<RemoteRequest> {
    let start = week_start.midnight().assume_utc();
    let end = start + time::Duration::days(7) - time::Duration::milliseconds(1);
    vec![
        RemoteRequest::get("/timesheets/my-sheets")
            .with_query("startDate", iso(start))
            .with_query("endDate", iso(end)),
        RemoteRequest::get("/time-entries/week").with_query("date", iso(start)),
    ]
}

/// Lists of submissions waiting on a supervisor.
pub fn pending_chain() -> Vec<RemoteRequest> {
    vec![
        RemoteRequest::get("/projects/pending-approvals"),
        RemoteRequest::get("/tasks/pending-approvals"),
        RemoteRequest::get("/tasks").with_query("status", WorkflowStatus::Submitted.to_string()),
        RemoteRequest::get("/tasks").with_query("status", "Done"),
        RemoteRequest::get("/tasks").with_query("state", "Done"),
        RemoteRequest::get("/tasks").with_query("stage", "Done"),
    ]
}

/// Every project visible to the user.
pub fn projects_chain() -> Vec<RemoteRequest> {
    vec![
        RemoteRequest::get("/projects/all"),
        RemoteRequest::get("/projects"),
    ]
}

/// Tasks of one project, for projects that only list task ids.
pub fn project_tasks_chain(project_id: &ProjectId) -> Vec<RemoteRequest> {
    vec![
        RemoteRequest::get(format!("/projects/{project_id}/tasks")),
        RemoteRequest::get("/tasks").with_query("project", project_id.as_str()),
        RemoteRequest::get("/tasks").with_query("projectId", project_id.as_str()),
    ]
}

// ============================================================================
// Record parsing
// ============================================================================

/// Id of a reference that may be a bare id or an embedded document.
fn record_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        Value::Object(_) => ["_id", "id"]
            .iter()
            .find_map(|field| value.get(field).and_then(record_id)),
        _ => None,
    }
}

fn first_field<'a>(record: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| record.get(field))
        .find(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.is_empty()))
}

fn text_field(record: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| record.get(field).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn needs_approval(record: &Value) -> bool {
    WorkflowStatus::from_fields(record).is_some_and(WorkflowStatus::needs_approval)
}

fn pending_item(project: &Value, task: Option<&Value>) -> Option<PendingSubmission> {
    let project_id = record_id(project)?;
    let project_name = text_field(project, &["name"])
        .or_else(|| {
            task.and_then(|t| t.get("project"))
                .and_then(|p| text_field(p, &["name"]))
        })
        .unwrap_or_else(|| UNKNOWN_PROJECT_NAME.to_string());
    let task_name = task
        .and_then(|t| text_field(t, &["name", "title"]))
        .unwrap_or_else(|| DEFAULT_TASK_NAME.to_string());

    Some(PendingSubmission {
        project_id: ProjectId::from(project_id),
        project_name,
        task_id: task.and_then(record_id).map(TaskId::from),
        task_name,
    })
}

fn sum_entry_hours(entries: &Value) -> f64 {
    entries
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| e.get("duration").and_then(Value::as_f64).unwrap_or(0.0) / SECONDS_PER_HOUR)
                .sum()
        })
        .unwrap_or(0.0)
}

fn timesheet_hours(sheets: &Value) -> f64 {
    sheets
        .get(0)
        .and_then(|sheet| sheet.get("totalHours"))
        .and_then(|h| h.as_f64().or_else(|| h.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0)
}

/// Drop repeated `(project, task)` pairs, keeping the first.
pub fn dedupe_pending(items: Vec<PendingSubmission>) -> Vec<PendingSubmission> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert((item.project_id.clone(), item.task_id.clone())))
        .collect()
}

// ============================================================================
// Gateway
// ============================================================================

/// Remote side of the engine. Cheap to clone.
pub struct SyncGateway<T> {
    transport: Arc<T>,
}

impl<T> Clone for SyncGateway<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> SyncGateway<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Post a finished segment to the remote time log. Returns whether it
    /// was accepted.
    pub async fn post_segment(&self, segment: &TimeSegment) -> bool {
        let body = match serde_json::to_value(segment) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("failed to encode time segment: {}", e);
                return false;
            }
        };

        let request = RemoteRequest::post(TIME_ENTRIES_PATH, body);
        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                tracing::error!(
                    status = response.status,
                    duration_ms = segment.duration_ms(),
                    "time segment rejected by remote log"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    duration_ms = segment.duration_ms(),
                    "failed to post time segment: {}",
                    e
                );
                false
            }
        }
    }

    /// Run a state transition chain. Exhausting the chain is logged, not
    /// returned as an error.
    pub async fn transition(&self, action: &str, chain: &[RemoteRequest]) -> RemoteOutcome {
        match run_fallback(self.transport.as_ref(), chain).await {
            Ok(confirmed) => {
                tracing::debug!(action, "confirmed by {}", confirmed.request);
                RemoteOutcome::Confirmed {
                    method: confirmed.request.method.to_string(),
                    path: confirmed.request.target(),
                }
            }
            Err(e) => {
                for attempt in &e.attempts {
                    tracing::debug!(action, "{} {}: {}", attempt.method, attempt.path, attempt.error);
                }
                tracing::warn!(action, "{}; keeping local state", e);
                RemoteOutcome::Unconfirmed {
                    attempts: e.attempts.len(),
                }
            }
        }
    }

    /// Hours already on record for the week starting `week_start`, or
    /// `None` when the remote API could not tell.
    pub async fn weekly_hours(&self, week_start: Date) -> Option<f64> {
        let chain = weekly_hours_chain(week_start);
        match run_fallback(self.transport.as_ref(), &chain).await {
            Ok(confirmed) => {
                let body = confirmed.response.body.unwrap_or(Value::Null);
                Some(match confirmed.index {
                    0 => timesheet_hours(&body),
                    _ => sum_entry_hours(&body),
                })
            }
            Err(e) => {
                tracing::warn!("failed to fetch weekly hours: {}", e);
                None
            }
        }
    }

    async fn get_json(&self, chain: &[RemoteRequest]) -> Option<Value> {
        run_fallback(self.transport.as_ref(), chain)
            .await
            .ok()
            .and_then(|confirmed| confirmed.response.body)
    }

    /// Submissions waiting on a supervisor, as far as the remote API knows.
    ///
    /// Combines the dedicated approval listings with a scan of every project
    /// and its tasks. Unreachable endpoints contribute nothing.
    pub async fn pending_submissions(&self) -> Vec<PendingSubmission> {
        let mut items = Vec::new();

        if let Some(Value::Array(direct)) = self.get_json(&pending_chain()).await {
            for record in &direct {
                let project = first_field(record, &["projectId", "project"]);
                let task = first_field(record, &["taskId", "task"]);
                let item = match (project, task) {
                    (Some(project), Some(task)) => pending_item(project, Some(task)),
                    _ if needs_approval(record) => {
                        project.and_then(|project| pending_item(project, Some(record)))
                    }
                    _ => None,
                };
                items.extend(item);
            }
        }

        let projects = match self.get_json(&projects_chain()).await {
            Some(Value::Array(projects)) => projects,
            _ => Vec::new(),
        };

        for project in &projects {
            if needs_approval(project) {
                items.extend(pending_item(project, None));
            }

            let mut tasks = project
                .get("tasks")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if tasks.first().is_some_and(|t| !t.is_object()) {
                if let Some(project_id) = record_id(project) {
                    let chain = project_tasks_chain(&ProjectId::from(project_id));
                    if let Some(Value::Array(fetched)) = self.get_json(&chain).await {
                        tasks = fetched;
                    }
                }
            }

            for task in tasks.iter().filter(|t| needs_approval(t)) {
                items.extend(pending_item(project, Some(task)));
            }
        }

        dedupe_pending(items)
    }
}
