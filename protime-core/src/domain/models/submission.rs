use serde::Serialize;

use super::{ProgressKey, ProjectId, TaskId, WorkflowStatus};

/// Project name used when the remote record carries none.
pub const UNKNOWN_PROJECT_NAME: &str = "Project";

/// Whether a remote state transition was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RemoteOutcome {
    /// The first strategy that answered with a success status.
    Confirmed { method: String, path: String },
    /// Accepted locally; every remote strategy failed.
    Unconfirmed { attempts: usize },
}

impl RemoteOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RemoteOutcome::Confirmed { .. })
    }
}

/// Result of submitting a task or recording a supervisor decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub key: ProgressKey,
    /// Status now cached locally for the project.
    pub local_status: WorkflowStatus,
    pub remote: RemoteOutcome,
}

/// A supervisor's verdict on a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Approved work is completed; rejected work goes back to the employee.
    pub fn target_status(self) -> WorkflowStatus {
        match self {
            Decision::Approve => WorkflowStatus::Completed,
            Decision::Reject => WorkflowStatus::InProgress,
        }
    }
}

/// A task waiting on a supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub project_id: ProjectId,
    pub project_name: String,
    pub task_id: Option<TaskId>,
    pub task_name: String,
}

impl PendingSubmission {
    pub fn is_virtual(&self) -> bool {
        self.task_id.is_none()
    }
}
