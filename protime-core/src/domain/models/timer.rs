use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{elapsed_ms, ProgressKey, ProjectId, TaskId, WorkflowStatus};

/// Task name used when a task has none.
pub const DEFAULT_TASK_NAME: &str = "General";

/// The single running work session of a user.
///
/// Present in the store if and only if a timer is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub project_id: ProjectId,
    pub project_name: String,
    /// `None` for a project-level virtual task.
    pub task_id: Option<TaskId>,
    pub task_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    /// Start of the segment that has not been flushed yet.
    #[serde(with = "time::serde::rfc3339")]
    pub last_saved_at: OffsetDateTime,
    /// Progress carried over when the run started. Informational only.
    #[serde(default)]
    pub accumulated_ms: u64,
    /// Bumped on every write so concurrent writers can be detected.
    #[serde(default)]
    pub revision: u64,
    /// Token of the session that wrote this revision.
    #[serde(default)]
    pub writer: String,
}

impl ActiveTimer {
    pub fn new(task: &TaskRef, started_at: OffsetDateTime, accumulated_ms: u64) -> Self {
        Self {
            project_id: task.project_id.clone(),
            project_name: task.project_name.clone(),
            task_id: task.task_id.clone(),
            task_name: task.task_name.clone(),
            start: started_at,
            last_saved_at: started_at,
            accumulated_ms,
            revision: 0,
            writer: String::new(),
        }
    }

    pub fn progress_key(&self) -> ProgressKey {
        ProgressKey::for_task(&self.project_id, self.task_id.as_ref())
    }

    /// Milliseconds recorded since the last flush boundary, clamped at zero.
    pub fn unflushed_ms(&self, now: OffsetDateTime) -> u64 {
        elapsed_ms(self.last_saved_at, now)
    }

    /// Milliseconds since the run began, clamped at zero.
    pub fn run_ms(&self, now: OffsetDateTime) -> u64 {
        elapsed_ms(self.start, now)
    }

    pub fn is_for(&self, task: &TaskRef) -> bool {
        self.project_id == task.project_id && self.task_id == task.task_id
    }
}

/// Estimates that seed the plan of a task the first time it is started.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlanHint {
    pub project_budget_hours: Option<f64>,
    pub estimated_minutes: Option<u32>,
    pub estimated_hours: Option<f64>,
}

impl PlanHint {
    /// Planned minutes suggested by the hint, if any estimate is positive.
    ///
    /// A project budget wins over task estimates, minutes over hours.
    pub fn resolve(&self) -> Option<u32> {
        if let Some(hours) = self.project_budget_hours.filter(|h| *h > 0.0) {
            return Some(hours_to_minutes(hours));
        }
        if let Some(minutes) = self.estimated_minutes.filter(|m| *m > 0) {
            return Some(minutes);
        }
        self.estimated_hours
            .filter(|h| *h > 0.0)
            .map(hours_to_minutes)
    }
}

fn hours_to_minutes(hours: f64) -> u32 {
    (hours * 60.0).round() as u32
}

/// A task (or project-level virtual task) as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRef {
    pub project_id: ProjectId,
    pub project_name: String,
    pub task_id: Option<TaskId>,
    pub task_name: String,
    /// Remote status, when known.
    pub status: Option<WorkflowStatus>,
    pub plan: PlanHint,
}

impl TaskRef {
    pub fn task(
        project_id: impl Into<ProjectId>,
        project_name: impl Into<String>,
        task_id: impl Into<TaskId>,
        task_name: impl Into<String>,
    ) -> Self {
        let task_name = task_name.into();
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            task_id: Some(task_id.into()),
            task_name: if task_name.trim().is_empty() {
                DEFAULT_TASK_NAME.to_string()
            } else {
                task_name
            },
            status: None,
            plan: PlanHint::default(),
        }
    }

    /// A project without an explicit task list, tracked as one task.
    pub fn project_level(project_id: impl Into<ProjectId>, project_name: impl Into<String>) -> Self {
        let project_name = project_name.into();
        let task_name = if project_name.trim().is_empty() {
            DEFAULT_TASK_NAME.to_string()
        } else {
            project_name.clone()
        };
        Self {
            project_id: project_id.into(),
            project_name,
            task_id: None,
            task_name,
            status: None,
            plan: PlanHint::default(),
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_plan(mut self, plan: PlanHint) -> Self {
        self.plan = plan;
        self
    }

    pub fn progress_key(&self) -> ProgressKey {
        ProgressKey::for_task(&self.project_id, self.task_id.as_ref())
    }

    pub fn is_virtual(&self) -> bool {
        self.task_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn active_timer_round_trips_instants_to_the_millisecond() {
        let task = TaskRef::task("p1", "Payroll", "t1", "Export");
        let mut timer = ActiveTimer::new(&task, datetime!(2025-03-04 09:15:30.123 UTC), 4_000);
        timer.last_saved_at = datetime!(2025-03-04 09:17:01.987 UTC);

        let raw = serde_json::to_string(&timer).unwrap();
        let decoded: ActiveTimer = serde_json::from_str(&raw).unwrap();

        assert_eq!(decoded.start, timer.start);
        assert_eq!(decoded.last_saved_at, timer.last_saved_at);
        assert_eq!(decoded, timer);
        assert!(raw.contains("\"lastSavedAt\""));
    }

    #[test]
    fn negative_elapsed_is_clamped() {
        let task = TaskRef::project_level("p1", "Payroll");
        let timer = ActiveTimer::new(&task, datetime!(2025-03-04 10:00 UTC), 0);
        assert_eq!(timer.unflushed_ms(datetime!(2025-03-04 09:59 UTC)), 0);
        assert_eq!(timer.run_ms(datetime!(2025-03-04 10:00:01.5 UTC)), 1_500);
    }

    #[test]
    fn project_level_task_uses_project_name() {
        let task = TaskRef::project_level("p1", "Payroll");
        assert!(task.is_virtual());
        assert_eq!(task.task_name, "Payroll");
        assert_eq!(task.progress_key().as_str(), "proj:p1");

        let unnamed = TaskRef::task("p1", "Payroll", "t1", " ");
        assert_eq!(unnamed.task_name, DEFAULT_TASK_NAME);
    }

    #[test]
    fn plan_hint_precedence() {
        let hint = PlanHint {
            project_budget_hours: Some(2.0),
            estimated_minutes: Some(45),
            estimated_hours: Some(1.0),
        };
        assert_eq!(hint.resolve(), Some(120));

        let hint = PlanHint {
            project_budget_hours: Some(0.0),
            estimated_minutes: Some(0),
            estimated_hours: Some(1.5),
        };
        assert_eq!(hint.resolve(), Some(90));

        assert_eq!(PlanHint::default().resolve(), None);
    }
}
