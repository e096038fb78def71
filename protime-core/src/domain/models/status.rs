use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Fields inspected, in order, when reading a status off a remote record.
const STATUS_FIELDS: [&str; 4] = ["status", "state", "stage", "progress"];

/// Workflow status of a task or project.
///
/// The remote API spells statuses inconsistently across resources, so
/// parsing goes through [`WorkflowStatus::normalize`] which accepts the
/// synonyms listed on each variant. `Display` yields the wire spelling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum WorkflowStatus {
    #[strum(
        to_string = "Not Started",
        serialize = "notstarted",
        serialize = "todo",
        serialize = "to do",
        serialize = "new",
        serialize = "open",
        serialize = "backlog"
    )]
    #[serde(rename = "Not Started")]
    NotStarted,
    #[strum(
        to_string = "In Progress",
        serialize = "inprogress",
        serialize = "active",
        serialize = "started",
        serialize = "doing",
        serialize = "working"
    )]
    #[serde(rename = "In Progress")]
    InProgress,
    #[strum(
        to_string = "Submitted for Approval",
        serialize = "submitted",
        serialize = "awaiting approval",
        serialize = "pending approval",
        serialize = "ready for review",
        serialize = "in review"
    )]
    #[serde(rename = "Submitted for Approval")]
    Submitted,
    #[strum(to_string = "Done", serialize = "finished")]
    Done,
    #[strum(
        to_string = "Completed",
        serialize = "complete",
        serialize = "approved",
        serialize = "closed"
    )]
    Completed,
}

impl WorkflowStatus {
    /// Parse a raw status string leniently.
    ///
    /// Case, surrounding whitespace, `_` and `-` separators are ignored.
    /// Anything mentioning "submitted" counts as [`WorkflowStatus::Submitted`].
    pub fn normalize(raw: &str) -> Option<Self> {
        let cleaned = raw
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if cleaned.is_empty() {
            return None;
        }

        Self::from_str(&cleaned).ok().or_else(|| {
            cleaned
                .contains("submitted")
                .then_some(WorkflowStatus::Submitted)
        })
    }

    /// Read the status of a heterogeneous remote record.
    ///
    /// The first non-empty string among `status`, `state`, `stage` and
    /// `progress` is normalized; later fields are not consulted.
    pub fn from_fields(record: &serde_json::Value) -> Option<Self> {
        STATUS_FIELDS
            .iter()
            .filter_map(|field| record.get(field).and_then(|v| v.as_str()))
            .find(|raw| !raw.trim().is_empty())
            .and_then(Self::normalize)
    }

    /// Whether a record in this status is waiting on a supervisor.
    pub fn needs_approval(self) -> bool {
        matches!(self, WorkflowStatus::Submitted | WorkflowStatus::Done)
    }

    /// Whether starting work on a task should move it to "In Progress" remotely.
    pub fn should_mark_in_progress(self) -> bool {
        matches!(self, WorkflowStatus::NotStarted | WorkflowStatus::Submitted)
    }

    pub fn board_column(self) -> BoardColumn {
        match self {
            WorkflowStatus::NotStarted => BoardColumn::NotStarted,
            WorkflowStatus::InProgress => BoardColumn::InProgress,
            WorkflowStatus::Submitted | WorkflowStatus::Done => BoardColumn::Done,
            WorkflowStatus::Completed => BoardColumn::Completed,
        }
    }
}

/// Column of the employee task board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum BoardColumn {
    #[strum(to_string = "Not Started")]
    NotStarted,
    #[strum(to_string = "In Progress")]
    InProgress,
    Done,
    Completed,
}

impl BoardColumn {
    /// Place a task on the board.
    ///
    /// Real tasks follow their remote status. Virtual tasks prefer the
    /// locally cached override, then the project status, and otherwise sit
    /// in "In Progress" only while their timer runs.
    pub fn resolve(
        remote: Option<WorkflowStatus>,
        virtual_override: Option<WorkflowStatus>,
        is_virtual: bool,
        running: bool,
    ) -> Self {
        if !is_virtual {
            return remote
                .map(WorkflowStatus::board_column)
                .unwrap_or(BoardColumn::NotStarted);
        }

        let any = |pred: fn(WorkflowStatus) -> bool| {
            virtual_override.is_some_and(pred) || remote.is_some_and(pred)
        };

        if any(|s| s == WorkflowStatus::Completed) {
            BoardColumn::Completed
        } else if any(|s| matches!(s, WorkflowStatus::Done | WorkflowStatus::Submitted)) {
            BoardColumn::Done
        } else if running {
            BoardColumn::InProgress
        } else {
            BoardColumn::NotStarted
        }
    }
}
