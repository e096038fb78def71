use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

use super::{
    local_store::LocalTimerStore,
    sync_gateway::{
        decision_chain, dedupe_pending, submit_task_chain, submit_virtual_chain,
        task_status_chain, SyncGateway,
    },
};
use crate::{
    config::EngineSettings,
    domain::{
        models::{
            ActiveTimer, BoardColumn, Decision, PendingSubmission, ProgressKey, ProgressPatch,
            ProgressView, ProjectId, RemoteOutcome, SegmentReceipt, SubmissionReceipt, TaskRef,
            TimeSegment, UserId, WeekSummary, WorkflowStatus, AUTO_FLUSH_DESCRIPTION,
            DEFAULT_TASK_NAME, PAUSE_DESCRIPTION, UNKNOWN_PROJECT_NAME,
        },
        ports::{
            inbound::TimerService,
            outbound::{Clock, KeyValueStore, Notice, Notifier, Transport},
        },
        StoreError, TimerError,
    },
};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// In-memory bookkeeping of one session. Guarded by the session mutex,
/// which also serializes every read-modify-write of the local store.
#[derive(Debug, Default)]
struct SessionState {
    /// Start of the run each key's plan warning last fired for. A run
    /// started by any session has a different start and re-arms it.
    warned: HashMap<ProgressKey, OffsetDateTime>,
    /// Revision of the active timer as this session last saw it.
    observed_revision: Option<u64>,
    /// Highest revision seen so far; new writes go above it.
    last_revision: u64,
}

/// The timer engine of one user session.
///
/// Local state is authoritative. Every operation commits its local
/// transition while holding the session lock, releases the lock, and only
/// then talks to the remote API.
///
/// Several sessions may share one store (two terminals, a UI and the
/// scheduler). Each write of the active timer carries a monotonic revision
/// and this session's writer token; before mutating, the persisted record
/// is reloaded and always wins over what this session remembered.
pub struct TimerSession<K, T, N, C> {
    user_id: UserId,
    writer: String,
    settings: EngineSettings,
    store: LocalTimerStore<K>,
    gateway: SyncGateway<T>,
    notifier: Arc<N>,
    clock: Arc<C>,
    state: Mutex<SessionState>,
}

impl<K, T, N, C> TimerSession<K, T, N, C>
where
    K: KeyValueStore,
    T: Transport,
    N: Notifier,
    C: Clock,
{
    pub fn new(
        user_id: UserId,
        settings: EngineSettings,
        store: LocalTimerStore<K>,
        gateway: SyncGateway<T>,
        notifier: Arc<N>,
        clock: Arc<C>,
    ) -> Self {
        let writer = format!(
            "{}/{}/{}",
            user_id,
            std::process::id(),
            NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            user_id,
            writer,
            settings,
            store,
            gateway,
            notifier,
            clock,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Token stamped on every active timer this session writes.
    pub fn writer(&self) -> &str {
        &self.writer
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &LocalTimerStore<K> {
        &self.store
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Reload the persisted active timer and reconcile it with what this
    /// session last observed.
    async fn load_for_write(&self, state: &mut SessionState) -> Option<ActiveTimer> {
        let timer = self.store.load_active_timer().await;

        match &timer {
            Some(timer) => {
                let foreign = timer.writer != self.writer;
                match state.observed_revision {
                    Some(seen) if seen != timer.revision && foreign => {
                        tracing::warn!(
                            seen,
                            revision = timer.revision,
                            writer = %timer.writer,
                            "active timer was changed by another session, using the stored record"
                        );
                    }
                    None if foreign => {
                        tracing::debug!(
                            revision = timer.revision,
                            writer = %timer.writer,
                            "adopting active timer"
                        );
                    }
                    _ => {}
                }
                state.observed_revision = Some(timer.revision);
                state.last_revision = state.last_revision.max(timer.revision);
            }
            None => {
                if state.observed_revision.take().is_some() {
                    tracing::debug!("active timer was cleared by another session");
                }
            }
        }

        timer
    }

    async fn commit(
        &self,
        state: &mut SessionState,
        mut timer: ActiveTimer,
    ) -> Result<ActiveTimer, StoreError> {
        timer.revision = state.last_revision + 1;
        timer.writer = self.writer.clone();
        self.store.save_active_timer(&timer).await?;
        state.last_revision = timer.revision;
        state.observed_revision = Some(timer.revision);
        Ok(timer)
    }

    /// Add `segment` to the recorded time of `timer`'s task. Runs after the
    /// timer transition is persisted; if the add fails, `timer` is written
    /// back so the segment stays unrecorded and a retry counts it once.
    async fn record_segment(
        &self,
        state: &mut SessionState,
        timer: ActiveTimer,
        segment: &TimeSegment,
    ) -> Result<(), StoreError> {
        let key = timer.progress_key();
        if let Err(e) = self.store.add_progress(&key, segment.duration_ms()).await {
            if let Err(restore) = self.commit(state, timer).await {
                tracing::error!("failed to restore active timer: {}", restore);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn clear(&self, state: &mut SessionState) -> Result<(), StoreError> {
        self.store.clear_active_timer().await?;
        state.observed_revision = None;
        Ok(())
    }

    fn planned_minutes(&self, stored: Option<u32>, task: Option<&TaskRef>) -> u32 {
        stored
            .or_else(|| task.and_then(|t| t.plan.resolve()))
            .unwrap_or(self.settings.default_planned_minutes)
    }

    /// The running timer with its derived figures, if a timer is running.
    pub async fn running_progress(&self) -> Option<(ActiveTimer, ProgressView)> {
        let timer = self.store.load_active_timer().await?;
        let progress = self.store.get_progress(&timer.progress_key()).await;
        let planned = self.planned_minutes(progress.planned_minutes, None);
        let view = ProgressView::compute(&progress, Some(&timer), self.clock.now(), planned);
        Some((timer, view))
    }

    fn report_unconfirmed(&self, action: &str, remote: &RemoteOutcome) {
        if let RemoteOutcome::Unconfirmed { attempts } = remote {
            self.notifier.notify(&Notice::RemoteUnconfirmed {
                action: action.to_string(),
                attempts: *attempts,
            });
        }
    }
}

#[async_trait]
impl<K, T, N, C> TimerService for TimerSession<K, T, N, C>
where
    K: KeyValueStore,
    T: Transport,
    N: Notifier,
    C: Clock,
{
    async fn active_timer(&self) -> Result<Option<ActiveTimer>, TimerError> {
        Ok(self.store.load_active_timer().await)
    }

    #[instrument(
        name = "TimerSession::start",
        skip(self, task),
        fields(user = %self.user_id, project = %task.project_id, key = %task.progress_key())
    )]
    async fn start(&self, task: &TaskRef) -> Result<ActiveTimer, TimerError> {
        let key = task.progress_key();

        let timer = {
            let mut state = self.state.lock().await;

            if let Some(running) = self.load_for_write(&mut state).await {
                return Err(TimerError::TimerAlreadyRunning {
                    task_name: running.task_name,
                });
            }

            let progress = self.store.get_progress(&key).await;
            if progress.accumulated_ms == 0
                && self.store.started_projects().await.contains(&task.project_id)
            {
                return Err(TimerError::ProjectAlreadyClaimed(task.project_id.clone()));
            }

            // First start fixes the plan; later starts keep it.
            if progress.planned_minutes.is_none() {
                let planned = self.planned_minutes(None, Some(task));
                self.store
                    .set_progress(&key, ProgressPatch::planned(planned))
                    .await?;
            }
            self.store.mark_project_started(&task.project_id).await?;

            let now = self.clock.now();
            let timer = ActiveTimer::new(task, now, progress.accumulated_ms);
            let timer = self.commit(&mut state, timer).await?;
            state.warned.remove(&key);
            timer
        };

        tracing::info!(task = %timer.task_name, "timer started");

        if let Some(task_id) = &task.task_id {
            if task.status.map_or(true, WorkflowStatus::should_mark_in_progress) {
                let chain = task_status_chain(&task.project_id, task_id, WorkflowStatus::InProgress);
                self.gateway.transition("start", &chain).await;
            }
        }

        Ok(timer)
    }

    #[instrument(name = "TimerSession::pause", skip(self), fields(user = %self.user_id))]
    async fn pause(&self) -> Result<SegmentReceipt, TimerError> {
        let segment = {
            let mut state = self.state.lock().await;
            let timer = self
                .load_for_write(&mut state)
                .await
                .ok_or(TimerError::NoTimerRunning)?;

            let segment = TimeSegment::unflushed(&timer, self.clock.now(), PAUSE_DESCRIPTION);
            self.clear(&mut state).await?;
            self.record_segment(&mut state, timer, &segment).await?;
            segment
        };

        tracing::info!(duration_ms = segment.duration_ms(), "timer paused");

        let synced = self.gateway.post_segment(&segment).await;
        Ok(SegmentReceipt { segment, synced })
    }

    #[instrument(name = "TimerSession::auto_flush", skip(self), fields(user = %self.user_id))]
    async fn auto_flush(&self) -> Result<Option<SegmentReceipt>, TimerError> {
        let segment = {
            let mut state = self.state.lock().await;
            let Some(mut timer) = self.load_for_write(&mut state).await else {
                return Ok(None);
            };

            let now = self.clock.now();
            if timer.unflushed_ms(now) < self.settings.flush_threshold_ms() {
                return Ok(None);
            }

            let segment = TimeSegment::unflushed(&timer, now, AUTO_FLUSH_DESCRIPTION);
            let previous = timer.clone();
            timer.last_saved_at = segment.end_time;
            self.commit(&mut state, timer).await?;
            self.record_segment(&mut state, previous, &segment).await?;
            segment
        };

        tracing::debug!(duration_ms = segment.duration_ms(), "flushed running segment");

        let synced = self.gateway.post_segment(&segment).await;
        Ok(Some(SegmentReceipt { segment, synced }))
    }

    async fn release_orphaned_timer(&self, assigned: &[ProjectId]) -> Result<bool, TimerError> {
        let mut state = self.state.lock().await;
        let Some(timer) = self.load_for_write(&mut state).await else {
            return Ok(false);
        };

        if assigned.contains(&timer.project_id) {
            return Ok(false);
        }

        tracing::warn!(
            project = %timer.project_id,
            "dropping timer of a project that is no longer assigned"
        );
        self.clear(&mut state).await?;
        Ok(true)
    }

    async fn progress(&self, task: &TaskRef) -> Result<ProgressView, TimerError> {
        let progress = self.store.get_progress(&task.progress_key()).await;
        let running = self
            .store
            .load_active_timer()
            .await
            .filter(|timer| timer.is_for(task));
        let planned = self.planned_minutes(progress.planned_minutes, Some(task));

        Ok(ProgressView::compute(
            &progress,
            running.as_ref(),
            self.clock.now(),
            planned,
        ))
    }

    async fn set_planned_minutes(&self, key: &ProgressKey, minutes: u32) -> Result<(), TimerError> {
        let _state = self.state.lock().await;
        self.store
            .set_progress(key, ProgressPatch::planned(minutes))
            .await?;
        tracing::info!(%key, minutes, "plan changed");
        Ok(())
    }

    async fn reset_progress(&self, key: &ProgressKey) -> Result<(), TimerError> {
        let _state = self.state.lock().await;
        self.store.reset_progress(key).await?;
        tracing::info!(%key, "progress reset");
        Ok(())
    }

    async fn check_threshold(&self) -> Result<Option<Notice>, TimerError> {
        let mut state = self.state.lock().await;
        let Some(timer) = self.store.load_active_timer().await else {
            return Ok(None);
        };

        let key = timer.progress_key();
        if state.warned.get(&key) == Some(&timer.start) {
            return Ok(None);
        }

        let progress = self.store.get_progress(&key).await;
        let planned = self.planned_minutes(progress.planned_minutes, None);
        let view = ProgressView::compute(&progress, Some(&timer), self.clock.now(), planned);
        if view.remaining_ms > self.settings.warn_before_ms() {
            return Ok(None);
        }

        state.warned.insert(key, timer.start);
        let notice = Notice::PlanAlmostExhausted {
            project_name: timer.project_name,
            task_name: timer.task_name,
            remaining_ms: view.remaining_ms,
        };
        self.notifier.notify(&notice);
        Ok(Some(notice))
    }

    async fn board_column(&self, task: &TaskRef) -> Result<BoardColumn, TimerError> {
        let virtual_override = if task.is_virtual() {
            self.store.virtual_status(&task.project_id).await
        } else {
            None
        };
        let running = self
            .store
            .load_active_timer()
            .await
            .is_some_and(|timer| timer.is_for(task));

        Ok(BoardColumn::resolve(
            task.status,
            virtual_override,
            task.is_virtual(),
            running,
        ))
    }

    async fn week_summary(&self) -> Result<WeekSummary, TimerError> {
        let now = self.clock.now();
        let week_start = self.settings.week_start.week_of(now.date());
        let remote_hours = self.gateway.weekly_hours(week_start).await;
        let live_ms = self
            .store
            .load_active_timer()
            .await
            .map(|timer| timer.unflushed_ms(now))
            .unwrap_or(0);

        Ok(WeekSummary {
            week_start,
            remote_hours,
            live_ms,
        })
    }

    #[instrument(
        name = "TimerSession::submit_for_approval",
        skip(self, task),
        fields(user = %self.user_id, project = %task.project_id)
    )]
    async fn submit_for_approval(&self, task: &TaskRef) -> Result<SubmissionReceipt, TimerError> {
        let running = self
            .store
            .load_active_timer()
            .await
            .is_some_and(|timer| timer.is_for(task));
        if running {
            match self.pause().await {
                Ok(_) | Err(TimerError::NoTimerRunning) => {}
                Err(e) => return Err(e),
            }
        }

        let key = task.progress_key();
        let chain = match &task.task_id {
            Some(task_id) => submit_task_chain(&task.project_id, task_id),
            None => {
                let stored = self.store.get_progress(&key).await.planned_minutes;
                let planned = self.planned_minutes(stored, Some(task));
                submit_virtual_chain(&task.project_id, &task.task_name, planned)
            }
        };

        {
            let _state = self.state.lock().await;
            self.store
                .set_virtual_status(&task.project_id, WorkflowStatus::Done)
                .await?;
        }

        let remote = self.gateway.transition("submit for approval", &chain).await;
        self.report_unconfirmed("submit for approval", &remote);

        Ok(SubmissionReceipt {
            key,
            local_status: WorkflowStatus::Done,
            remote,
        })
    }

    #[instrument(
        name = "TimerSession::record_decision",
        skip(self, item),
        fields(user = %self.user_id, project = %item.project_id)
    )]
    async fn record_decision(
        &self,
        item: &PendingSubmission,
        decision: Decision,
    ) -> Result<SubmissionReceipt, TimerError> {
        let status = decision.target_status();
        {
            let _state = self.state.lock().await;
            self.store
                .set_virtual_status(&item.project_id, status)
                .await?;
        }

        let chain = decision_chain(item, decision);
        let remote = self.gateway.transition("record decision", &chain).await;
        self.report_unconfirmed("record decision", &remote);

        Ok(SubmissionReceipt {
            key: ProgressKey::for_task(&item.project_id, item.task_id.as_ref()),
            local_status: status,
            remote,
        })
    }

    async fn pending_submissions(&self) -> Result<Vec<PendingSubmission>, TimerError> {
        let mut items = self.gateway.pending_submissions().await;

        for (project_id, status) in self.store.virtual_statuses().await {
            if status != WorkflowStatus::Done {
                continue;
            }
            let project_name = items
                .iter()
                .find(|item| item.project_id == project_id)
                .map(|item| item.project_name.clone())
                .unwrap_or_else(|| UNKNOWN_PROJECT_NAME.to_string());
            items.push(PendingSubmission {
                project_id,
                project_name,
                task_id: None,
                task_name: DEFAULT_TASK_NAME.to_string(),
            });
        }

        Ok(dedupe_pending(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::{
        ManualClock, MemoryKeyValueStore, MockTransport, RecordingNotifier,
    };
    use crate::domain::{
        models::{PlanHint, TaskProgress, MS_PER_MINUTE},
        ports::outbound::{Method, RemoteResponse},
    };
    use serde_json::json;
    use time::{macros::datetime, Duration};

    type TestSession =
        TimerSession<MemoryKeyValueStore, MockTransport, RecordingNotifier, ManualClock>;

    struct Harness {
        kv: Arc<MemoryKeyValueStore>,
        transport: Arc<MockTransport>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
        session: TestSession,
    }

    impl Harness {
        fn new(transport: MockTransport) -> Self {
            Self::with_kv(Arc::new(MemoryKeyValueStore::new()), transport)
        }

        fn with_kv(kv: Arc<MemoryKeyValueStore>, transport: MockTransport) -> Self {
            let transport = Arc::new(transport);
            let notifier = Arc::new(RecordingNotifier::new());
            let clock = Arc::new(ManualClock::new(datetime!(2025-03-04 09:00 UTC)));
            let session = TimerSession::new(
                UserId::from("u1"),
                EngineSettings::default(),
                LocalTimerStore::new(kv.clone()),
                SyncGateway::new(transport.clone()),
                notifier.clone(),
                clock.clone(),
            );
            Self {
                kv,
                transport,
                notifier,
                clock,
                session,
            }
        }

        /// A second session sharing this one's store, transport and clock.
        fn sibling(&self) -> TestSession {
            TimerSession::new(
                UserId::from("u1"),
                EngineSettings::default(),
                LocalTimerStore::new(self.kv.clone()),
                SyncGateway::new(self.transport.clone()),
                self.notifier.clone(),
                self.clock.clone(),
            )
        }

        fn advance_ms(&self, ms: i64) {
            self.clock.advance(Duration::milliseconds(ms));
        }

        async fn progress_of(&self, task: &TaskRef) -> TaskProgress {
            self.session.store().get_progress(&task.progress_key()).await
        }
    }

    fn accepting_transport() -> MockTransport {
        MockTransport::new().with_response(Method::Post, "/time-entries", RemoteResponse::new(201))
    }

    fn export_task() -> TaskRef {
        TaskRef::task("p1", "Payroll", "t1", "Export").with_status(WorkflowStatus::InProgress)
    }

    #[tokio::test]
    async fn start_creates_timer_and_fixes_plan() {
        let h = Harness::new(accepting_transport());
        let task = export_task().with_plan(PlanHint {
            estimated_minutes: Some(45),
            ..PlanHint::default()
        });

        let timer = h.session.start(&task).await.unwrap();

        assert_eq!(timer.start, timer.last_saved_at);
        assert_eq!(timer.revision, 1);
        assert_eq!(timer.writer, h.session.writer());
        assert_eq!(h.progress_of(&task).await.planned_minutes, Some(45));
        assert!(h
            .session
            .store()
            .started_projects()
            .await
            .contains(&ProjectId::from("p1")));
        assert_eq!(h.session.active_timer().await.unwrap(), Some(timer));
    }

    #[tokio::test]
    async fn plan_is_sticky_across_runs() {
        let h = Harness::new(accepting_transport());
        let task = export_task().with_plan(PlanHint {
            estimated_minutes: Some(45),
            ..PlanHint::default()
        });
        h.session.start(&task).await.unwrap();
        h.advance_ms(1_000);
        h.session.pause().await.unwrap();

        let changed_estimate = export_task().with_plan(PlanHint {
            estimated_minutes: Some(90),
            ..PlanHint::default()
        });
        h.session.start(&changed_estimate).await.unwrap();
        assert_eq!(h.progress_of(&task).await.planned_minutes, Some(45));

        h.session
            .set_planned_minutes(&task.progress_key(), 120)
            .await
            .unwrap();
        assert_eq!(h.progress_of(&task).await.planned_minutes, Some(120));
    }

    #[tokio::test]
    async fn accumulated_time_is_sum_of_runs_regardless_of_flushes() {
        let h = Harness::new(accepting_transport());
        let task = export_task();

        let runs: [(i64, &[i64]); 3] = [
            (30_500, &[]),
            (185_250, &[61_000, 70_000]),
            (61_001, &[61_000]),
        ];
        let mut expected = 0;

        for (run_ms, flush_points) in runs {
            h.session.start(&task).await.unwrap();
            let mut elapsed = 0;
            for point in flush_points {
                h.advance_ms(point - elapsed);
                elapsed = *point;
                h.session.auto_flush().await.unwrap();
                // A flush right after a flush is below the threshold.
                assert!(h.session.auto_flush().await.unwrap().is_none());
            }
            h.advance_ms(run_ms - elapsed);
            h.session.pause().await.unwrap();
            h.advance_ms(5_000);
            expected += run_ms as u64;
        }

        assert_eq!(h.progress_of(&task).await.accumulated_ms, expected);
    }

    #[tokio::test]
    async fn flush_then_pause_scenario() {
        let h = Harness::new(accepting_transport());
        let task = export_task();
        let started = h.session.start(&task).await.unwrap();

        h.advance_ms(65_000);
        let flushed = h.session.auto_flush().await.unwrap().unwrap();
        assert_eq!(flushed.segment.start_time, started.start);
        assert_eq!(flushed.segment.duration_ms(), 65_000);
        assert_eq!(flushed.segment.description, AUTO_FLUSH_DESCRIPTION);
        assert!(flushed.synced);

        let timer = h.session.active_timer().await.unwrap().unwrap();
        assert_eq!(timer.last_saved_at, flushed.segment.end_time);
        assert_eq!(timer.start, started.start);
        assert_eq!(h.progress_of(&task).await.accumulated_ms, 65_000);

        h.advance_ms(25_000);
        let paused = h.session.pause().await.unwrap();
        assert_eq!(paused.segment.start_time, flushed.segment.end_time);
        assert_eq!(paused.segment.duration_ms(), 25_000);
        assert_eq!(paused.segment.description, PAUSE_DESCRIPTION);

        assert_eq!(h.progress_of(&task).await.accumulated_ms, 90_000);
        assert!(h.session.active_timer().await.unwrap().is_none());
        assert_eq!(h.transport.calls_to(Method::Post, "/time-entries").len(), 2);
    }

    #[tokio::test]
    async fn flush_below_threshold_does_nothing() {
        let h = Harness::new(accepting_transport());
        assert!(h.session.auto_flush().await.unwrap().is_none());

        h.session.start(&export_task()).await.unwrap();
        h.advance_ms(59_999);
        assert!(h.session.auto_flush().await.unwrap().is_none());
        assert!(h.transport.calls_to(Method::Post, "/time-entries").is_empty());
    }

    #[tokio::test]
    async fn pause_while_offline_still_accounts_time() {
        let h = Harness::new(MockTransport::offline());
        let task = export_task();
        h.session.start(&task).await.unwrap();
        h.advance_ms(42_000);

        let receipt = h.session.pause().await.unwrap();

        assert!(!receipt.synced);
        assert_eq!(h.progress_of(&task).await.accumulated_ms, 42_000);
        assert!(h.session.active_timer().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flush_while_offline_still_advances() {
        let h = Harness::new(MockTransport::offline());
        let task = export_task();
        h.session.start(&task).await.unwrap();
        h.advance_ms(61_000);

        let receipt = h.session.auto_flush().await.unwrap().unwrap();

        assert!(!receipt.synced);
        assert_eq!(h.progress_of(&task).await.accumulated_ms, 61_000);
        let timer = h.session.active_timer().await.unwrap().unwrap();
        assert_eq!(timer.last_saved_at, receipt.segment.end_time);
    }

    #[tokio::test]
    async fn start_while_running_is_rejected_without_mutation() {
        let h = Harness::new(accepting_transport());
        let task = export_task();
        let other = TaskRef::task("p2", "Audit", "t2", "Review");

        h.session.start(&task).await.unwrap();
        h.advance_ms(10_000);
        let timer_before = h.kv.raw("active_timer");
        let progress_before = h.kv.raw("task_progress");

        let err = h.session.start(&other).await.unwrap_err();

        assert!(matches!(
            err,
            TimerError::TimerAlreadyRunning { ref task_name } if task_name == "Export"
        ));
        assert_eq!(h.kv.raw("active_timer"), timer_before);
        assert_eq!(h.kv.raw("task_progress"), progress_before);
        assert_eq!(h.session.store().get_progress(&other.progress_key()).await, TaskProgress::default());
    }

    #[tokio::test]
    async fn claimed_project_without_progress_is_rejected() {
        let h = Harness::new(accepting_transport());
        let task = export_task();
        h.session
            .store()
            .mark_project_started(&task.project_id)
            .await
            .unwrap();

        let err = h.session.start(&task).await.unwrap_err();
        assert!(matches!(err, TimerError::ProjectAlreadyClaimed(ref p) if p.as_str() == "p1"));
        assert!(h.session.active_timer().await.unwrap().is_none());

        h.session
            .store()
            .add_progress(&task.progress_key(), 1_000)
            .await
            .unwrap();
        assert!(h.session.start(&task).await.is_ok());
    }

    #[tokio::test]
    async fn pause_without_timer_fails() {
        let h = Harness::new(accepting_transport());
        assert!(matches!(
            h.session.pause().await,
            Err(TimerError::NoTimerRunning)
        ));
    }

    #[tokio::test]
    async fn warning_fires_once_per_run() {
        let h = Harness::new(accepting_transport());
        let task = export_task().with_plan(PlanHint {
            estimated_minutes: Some(30),
            ..PlanHint::default()
        });
        h.session.start(&task).await.unwrap();

        h.advance_ms(29 * 60_000);
        assert!(h.session.check_threshold().await.unwrap().is_none());

        h.advance_ms(31_000); // 29:31
        let notice = h.session.check_threshold().await.unwrap();
        assert_eq!(
            notice,
            Some(Notice::PlanAlmostExhausted {
                project_name: "Payroll".to_string(),
                task_name: "Export".to_string(),
                remaining_ms: 29_000,
            })
        );

        h.advance_ms(14_000); // 29:45
        assert!(h.session.check_threshold().await.unwrap().is_none());
        h.advance_ms(14_000); // 29:59
        assert!(h.session.check_threshold().await.unwrap().is_none());
        assert_eq!(h.notifier.notices().len(), 1);

        // A new run re-arms the warning.
        h.session.pause().await.unwrap();
        h.session.start(&task).await.unwrap();
        assert!(h.session.check_threshold().await.unwrap().is_some());
        assert_eq!(h.notifier.notices().len(), 2);
    }

    #[tokio::test]
    async fn progress_view_counts_only_the_unflushed_segment() {
        let h = Harness::new(accepting_transport());
        let task = export_task();
        h.session.start(&task).await.unwrap();
        h.advance_ms(70_000);
        h.session.auto_flush().await.unwrap();
        h.advance_ms(20_000);

        let view = h.session.progress(&task).await.unwrap();
        assert_eq!(view.spent_ms, 90_000);
        assert_eq!(view.planned_ms, 60 * MS_PER_MINUTE);
        assert!(view.running);
        assert_eq!(view, h.session.progress(&task).await.unwrap());

        let idle = h
            .session
            .progress(&TaskRef::task("p2", "Audit", "t2", "Review"))
            .await
            .unwrap();
        assert!(!idle.running);
        assert_eq!(idle.spent_ms, 0);
    }

    #[tokio::test]
    async fn reset_zeroes_time_but_keeps_plan() {
        let h = Harness::new(accepting_transport());
        let task = export_task();
        h.session.start(&task).await.unwrap();
        h.advance_ms(5_000);
        h.session.pause().await.unwrap();

        h.session.reset_progress(&task.progress_key()).await.unwrap();

        let progress = h.progress_of(&task).await;
        assert_eq!(progress.accumulated_ms, 0);
        assert_eq!(progress.planned_minutes, Some(60));
    }

    #[tokio::test]
    async fn start_marks_fresh_task_in_progress_remotely() {
        let h = Harness::new(accepting_transport());
        let task = TaskRef::task("p1", "Payroll", "t1", "Export").with_status(WorkflowStatus::NotStarted);
        h.session.start(&task).await.unwrap();
        assert_eq!(
            h.transport.call_targets(),
            vec![
                "PUT /projects/p1/tasks/t1",
                "PUT /projects/p1/tasks/t1/status",
                "PUT /tasks/t1/status",
                "POST /tasks/t1/status",
            ]
        );
        // Remote failure does not undo the local start.
        assert!(h.session.active_timer().await.unwrap().is_some());

        let h = Harness::new(accepting_transport());
        h.session.start(&export_task()).await.unwrap();
        assert!(h.transport.calls().is_empty());

        let h = Harness::new(accepting_transport());
        h.session
            .start(&TaskRef::project_level("p9", "Ops"))
            .await
            .unwrap();
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writer_is_detected_and_its_record_wins() {
        let h = Harness::new(accepting_transport());
        let other = h.sibling();
        let task = export_task();

        h.session.start(&task).await.unwrap();
        h.advance_ms(61_000);

        // Another surface flushes the shared timer.
        let flushed = other.auto_flush().await.unwrap().unwrap();
        let stored = h.session.active_timer().await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.writer, other.writer());

        // Pausing from the first session must build on the flushed record,
        // not its own stale copy, so no time is counted twice.
        h.advance_ms(9_000);
        let paused = h.session.pause().await.unwrap();
        assert_eq!(paused.segment.start_time, flushed.segment.end_time);
        assert_eq!(h.progress_of(&task).await.accumulated_ms, 70_000);
    }

    #[tokio::test]
    async fn orphaned_timer_is_released_without_segment() {
        let h = Harness::new(accepting_transport());
        h.session.start(&export_task()).await.unwrap();
        h.advance_ms(30_000);

        let assigned = [ProjectId::from("p1")];
        assert!(!h.session.release_orphaned_timer(&assigned).await.unwrap());

        let assigned = [ProjectId::from("p2")];
        assert!(h.session.release_orphaned_timer(&assigned).await.unwrap());
        assert!(h.session.active_timer().await.unwrap().is_none());
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.progress_of(&export_task()).await.accumulated_ms, 0);
    }

    #[tokio::test]
    async fn submit_running_task_pauses_first() {
        let h = Harness::new(
            accepting_transport().with_response(Method::Put, "/tasks/t1/status", RemoteResponse::new(200)),
        );
        let task = export_task();
        h.session.start(&task).await.unwrap();
        h.advance_ms(12_000);

        let receipt = h.session.submit_for_approval(&task).await.unwrap();

        assert!(h.session.active_timer().await.unwrap().is_none());
        assert_eq!(h.progress_of(&task).await.accumulated_ms, 12_000);
        assert_eq!(receipt.local_status, WorkflowStatus::Done);
        assert_eq!(
            receipt.remote,
            RemoteOutcome::Confirmed {
                method: "PUT".to_string(),
                path: "/tasks/t1/status".to_string()
            }
        );
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn submit_virtual_task_offline_is_accepted_locally() {
        let h = Harness::new(MockTransport::offline());
        let task = TaskRef::project_level("p1", "Payroll").with_plan(PlanHint {
            project_budget_hours: Some(2.0),
            ..PlanHint::default()
        });

        let receipt = h.session.submit_for_approval(&task).await.unwrap();

        assert_eq!(receipt.remote, RemoteOutcome::Unconfirmed { attempts: 4 });
        assert_eq!(receipt.key.as_str(), "proj:p1");
        assert_eq!(
            h.session.store().virtual_status(&ProjectId::from("p1")).await,
            Some(WorkflowStatus::Done)
        );
        let create = &h.transport.calls()[0];
        assert_eq!(create.to_string(), "POST /projects/p1/tasks");
        assert_eq!(create.body.as_ref().unwrap()["estimatedMinutes"], json!(120));
        assert_eq!(
            h.notifier.notices(),
            vec![Notice::RemoteUnconfirmed {
                action: "submit for approval".to_string(),
                attempts: 4
            }]
        );
        assert_eq!(
            h.session.board_column(&task).await.unwrap(),
            BoardColumn::Done
        );
    }

    #[tokio::test]
    async fn decision_updates_virtual_status_and_pending_list() {
        let h = Harness::new(MockTransport::new().with_response(
            Method::Put,
            "/projects/p1",
            RemoteResponse::new(200),
        ));
        let task = TaskRef::project_level("p1", "Payroll");
        h.session.submit_for_approval(&task).await.unwrap();

        let pending = h.session.pending_submissions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_virtual());
        assert_eq!(pending[0].task_name, DEFAULT_TASK_NAME);

        let receipt = h
            .session
            .record_decision(&pending[0], Decision::Approve)
            .await
            .unwrap();
        assert_eq!(receipt.local_status, WorkflowStatus::Completed);
        assert!(receipt.remote.is_confirmed());
        assert_eq!(
            h.session.board_column(&task).await.unwrap(),
            BoardColumn::Completed
        );
        assert!(h.session.pending_submissions().await.unwrap().is_empty());

        h.session
            .record_decision(&pending[0], Decision::Reject)
            .await
            .unwrap();
        assert_eq!(
            h.session.store().virtual_status(&ProjectId::from("p1")).await,
            Some(WorkflowStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn board_column_tracks_running_virtual_task() {
        let h = Harness::new(accepting_transport());
        let task = TaskRef::project_level("p1", "Payroll");
        assert_eq!(
            h.session.board_column(&task).await.unwrap(),
            BoardColumn::NotStarted
        );
        h.session.start(&task).await.unwrap();
        assert_eq!(
            h.session.board_column(&task).await.unwrap(),
            BoardColumn::InProgress
        );
    }

    #[tokio::test]
    async fn week_summary_adds_running_segment() {
        let h = Harness::new(accepting_transport().with_ok(
            Method::Get,
            "/timesheets/my-sheets?startDate=2025-03-02T00:00:00Z&endDate=2025-03-08T23:59:59.999Z",
            json!([{ "totalHours": 4 }]),
        ));
        h.session.start(&export_task()).await.unwrap();
        h.advance_ms(30 * 60_000);

        let summary = h.session.week_summary().await.unwrap();

        assert_eq!(summary.week_start, time::macros::date!(2025 - 03 - 02));
        assert_eq!(summary.remote_hours, Some(4.0));
        assert_eq!(summary.live_ms, 30 * 60_000);
        assert!((summary.total_hours() - 4.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn corrupted_timer_reads_as_idle() {
        let h = Harness::new(accepting_transport());
        h.kv.insert_raw("active_timer", "{\"projectId\": 7");
        assert!(h.session.active_timer().await.unwrap().is_none());
        assert!(h.session.start(&export_task()).await.is_ok());
    }

    #[tokio::test]
    async fn warning_re_arms_when_another_session_restarts_the_task() {
        let h = Harness::new(accepting_transport());
        let other = h.sibling();
        let task = export_task().with_plan(PlanHint {
            estimated_minutes: Some(1),
            ..PlanHint::default()
        });

        other.start(&task).await.unwrap();
        h.advance_ms(40_000);
        assert!(h.session.check_threshold().await.unwrap().is_some());
        assert!(h.session.check_threshold().await.unwrap().is_none());

        other.pause().await.unwrap();
        h.advance_ms(5_000);
        other.start(&task).await.unwrap();

        let notice = h.session.check_threshold().await.unwrap();
        assert!(matches!(
            notice,
            Some(Notice::PlanAlmostExhausted { remaining_ms: 20_000, .. })
        ));
        assert_eq!(h.notifier.notices().len(), 2);
    }

    /// Memory store whose next write to one key fails once.
    struct FlakyKv {
        inner: MemoryKeyValueStore,
        fail_next: std::sync::Mutex<Option<&'static str>>,
    }

    impl FlakyKv {
        fn new() -> Self {
            Self {
                inner: MemoryKeyValueStore::new(),
                fail_next: std::sync::Mutex::new(None),
            }
        }

        fn fail_next_write_to(&self, key: &'static str) {
            *self.fail_next.lock().unwrap() = Some(key);
        }

        fn check(&self, key: &str) -> Result<(), StoreError> {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next == Some(key) {
                *fail_next = None;
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyKv {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.check(key)?;
            self.inner.put(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.check(key)?;
            self.inner.remove(key).await
        }
    }

    fn flaky_session(
        kv: Arc<FlakyKv>,
        clock: Arc<ManualClock>,
    ) -> TimerSession<FlakyKv, MockTransport, RecordingNotifier, ManualClock> {
        TimerSession::new(
            UserId::from("u1"),
            EngineSettings::default(),
            LocalTimerStore::new(kv),
            SyncGateway::new(Arc::new(accepting_transport())),
            Arc::new(RecordingNotifier::new()),
            clock,
        )
    }

    #[tokio::test]
    async fn failed_pause_is_retried_without_counting_twice() {
        let kv = Arc::new(FlakyKv::new());
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-04 09:00 UTC)));
        let session = flaky_session(kv.clone(), clock.clone());
        let task = export_task();
        let key = task.progress_key();

        session.start(&task).await.unwrap();
        clock.advance(Duration::seconds(10));

        // Clearing the timer fails: nothing is recorded.
        kv.fail_next_write_to("active_timer");
        assert!(matches!(session.pause().await, Err(TimerError::Store(_))));
        assert_eq!(session.store().get_progress(&key).await.accumulated_ms, 0);

        // Recording the time fails: the timer is put back.
        kv.fail_next_write_to("task_progress");
        assert!(matches!(session.pause().await, Err(TimerError::Store(_))));
        assert!(session.active_timer().await.unwrap().is_some());
        assert_eq!(session.store().get_progress(&key).await.accumulated_ms, 0);

        session.pause().await.unwrap();
        assert_eq!(session.store().get_progress(&key).await.accumulated_ms, 10_000);
        assert!(session.active_timer().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_flush_keeps_segment_boundary() {
        let kv = Arc::new(FlakyKv::new());
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-04 09:00 UTC)));
        let session = flaky_session(kv.clone(), clock.clone());
        let task = export_task();
        let key = task.progress_key();

        let started = session.start(&task).await.unwrap();
        clock.advance(Duration::seconds(70));

        kv.fail_next_write_to("task_progress");
        assert!(session.auto_flush().await.is_err());
        let stored = session.active_timer().await.unwrap().unwrap();
        assert_eq!(stored.last_saved_at, started.last_saved_at);
        assert_eq!(session.store().get_progress(&key).await.accumulated_ms, 0);

        clock.advance(Duration::seconds(5));
        let receipt = session.auto_flush().await.unwrap().unwrap();
        assert_eq!(receipt.segment.duration_ms(), 75_000);
        session.pause().await.unwrap();
        assert_eq!(session.store().get_progress(&key).await.accumulated_ms, 75_000);
    }
}
