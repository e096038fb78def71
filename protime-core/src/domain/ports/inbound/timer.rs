use async_trait::async_trait;

use crate::domain::{
    models::{
        ActiveTimer, BoardColumn, Decision, PendingSubmission, ProgressKey, ProgressView,
        ProjectId, SegmentReceipt, SubmissionReceipt, TaskRef, WeekSummary,
    },
    ports::outbound::Notice,
    TimerError,
};

/// Inbound port for the timer engine of one user session.
///
/// Local state is the source of truth: every operation finishes its local
/// transition before talking to the remote API, and remote failures never
/// roll it back.
#[async_trait]
pub trait TimerService: Send + Sync + 'static {
    // ========================================================================
    // Active Timer Operations
    // ========================================================================

    /// Get the currently running timer, if any.
    async fn active_timer(&self) -> Result<Option<ActiveTimer>, TimerError>;

    /// Start a timer for `task`.
    ///
    /// Fails without touching any state if a timer is already running, or if
    /// the task's project was already claimed and has no recorded progress.
    async fn start(&self, task: &TaskRef) -> Result<ActiveTimer, TimerError>;

    /// Stop the running timer, recording its unflushed segment.
    async fn pause(&self) -> Result<SegmentReceipt, TimerError>;

    /// Record the unflushed segment of a long-running timer without stopping it.
    ///
    /// Returns `None` when nothing is running or the segment is younger than
    /// the flush threshold.
    async fn auto_flush(&self) -> Result<Option<SegmentReceipt>, TimerError>;

    /// Drop a running timer whose project is no longer assigned to the user.
    ///
    /// Returns whether a timer was dropped. No segment is recorded.
    async fn release_orphaned_timer(&self, assigned: &[ProjectId]) -> Result<bool, TimerError>;

    // ========================================================================
    // Progress
    // ========================================================================

    /// Derived time figures for `task` right now.
    async fn progress(&self, task: &TaskRef) -> Result<ProgressView, TimerError>;

    /// Explicitly change the plan of a task, overriding the sticky value.
    async fn set_planned_minutes(&self, key: &ProgressKey, minutes: u32) -> Result<(), TimerError>;

    /// Explicitly zero the recorded time of a task. The plan is kept.
    async fn reset_progress(&self, key: &ProgressKey) -> Result<(), TimerError>;

    /// One-shot warning when the running task is close to its plan.
    ///
    /// Fires at most once per run; starting a timer re-arms it.
    async fn check_threshold(&self) -> Result<Option<Notice>, TimerError>;

    /// Board column for `task`, taking local overrides into account.
    async fn board_column(&self, task: &TaskRef) -> Result<BoardColumn, TimerError>;

    /// Hours worked in the current week, including the running segment.
    async fn week_summary(&self) -> Result<WeekSummary, TimerError>;

    // ========================================================================
    // Approval Workflow
    // ========================================================================

    /// Pause `task` if it is running, then submit it for approval.
    ///
    /// The project is marked done locally whether or not the remote API
    /// accepts the submission.
    async fn submit_for_approval(&self, task: &TaskRef) -> Result<SubmissionReceipt, TimerError>;

    /// Record a supervisor decision on a submission.
    async fn record_decision(
        &self,
        item: &PendingSubmission,
        decision: Decision,
    ) -> Result<SubmissionReceipt, TimerError>;

    /// Submissions waiting on a supervisor, remote and locally cached.
    async fn pending_submissions(&self) -> Result<Vec<PendingSubmission>, TimerError>;
}
