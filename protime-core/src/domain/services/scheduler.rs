use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::instrument;

use super::timer_session::TimerSession;
use crate::domain::{
    models::{ActiveTimer, ProgressView, WeekSummary},
    ports::{
        inbound::TimerService,
        outbound::{Clock, KeyValueStore, Notifier, Transport},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMessage {
    /// Run a flush tick now instead of waiting for the next one.
    ForceFlush,
    Stop,
}

/// What the UI should show after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub active: Option<ActiveTimer>,
    pub progress: Option<ProgressView>,
    /// `None` until the first weekly total has been fetched.
    pub week: Option<WeekSummary>,
}

impl TickReport {
    fn idle(at: OffsetDateTime) -> Self {
        Self {
            at,
            active: None,
            progress: None,
            week: None,
        }
    }
}

/// Drives a [`TimerSession`] on two clocks: a fast UI tick that only
/// observes, and a slow flush tick that records long-running segments.
///
/// Flushes run on their own task so a slow network never holds up UI ticks.
pub struct ReconciliationScheduler<K, T, N, C> {
    session: Arc<TimerSession<K, T, N, C>>,
    week: Arc<RwLock<Option<WeekSummary>>>,
    reports: watch::Sender<TickReport>,
}

impl<K, T, N, C> ReconciliationScheduler<K, T, N, C>
where
    K: KeyValueStore,
    T: Transport,
    N: Notifier,
    C: Clock,
{
    pub fn new(session: Arc<TimerSession<K, T, N, C>>) -> Self {
        let (reports, _) = watch::channel(TickReport::idle(session.now()));
        Self {
            session,
            week: Arc::new(RwLock::new(None)),
            reports,
        }
    }

    /// Reports published after every UI tick.
    pub fn subscribe(&self) -> watch::Receiver<TickReport> {
        self.reports.subscribe()
    }

    #[instrument(name = "ReconciliationScheduler::run", skip_all, fields(user = %self.session.user_id()))]
    pub async fn run(&self, mut control: mpsc::Receiver<SchedulerMessage>) {
        let settings = self.session.settings();
        let mut ui = tokio::time::interval(settings.ui_tick());
        let mut flush = tokio::time::interval(settings.flush_interval());
        ui.set_missed_tick_behavior(MissedTickBehavior::Skip);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                message = control.recv() => {
                    match message {
                        Some(SchedulerMessage::ForceFlush) => {
                            tracing::debug!("forced flush");
                            self.spawn_flush(&mut in_flight);
                        }
                        Some(SchedulerMessage::Stop) | None => {
                            tracing::debug!("stopping scheduler");
                            break;
                        }
                    }
                }
                _ = ui.tick() => {
                    self.ui_tick().await;
                }
                _ = flush.tick() => {
                    self.spawn_flush(&mut in_flight);
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                tracing::error!("flush task failed: {}", e);
            }
        }
    }

    /// Recompute derived figures, fire the plan warning if due, and publish
    /// a report. Never mutates timer state.
    pub async fn ui_tick(&self) -> TickReport {
        if let Err(e) = self.session.check_threshold().await {
            tracing::error!("threshold check failed: {}", e);
        }

        let now = self.session.now();
        let running = self.session.running_progress().await;
        let live_ms = running
            .as_ref()
            .map(|(timer, _)| timer.unflushed_ms(now))
            .unwrap_or(0);
        let week = *self.week.read().unwrap_or_else(PoisonError::into_inner);
        let week = week.map(|week| WeekSummary { live_ms, ..week });

        let (active, progress) = match running {
            Some((timer, view)) => (Some(timer), Some(view)),
            None => (None, None),
        };
        let report = TickReport {
            at: now,
            active,
            progress,
            week,
        };

        self.reports.send_replace(report.clone());
        report
    }

    /// Start a flush tick on its own task unless the previous one is still
    /// running. Returns whether a flush was started.
    pub fn spawn_flush(&self, in_flight: &mut Option<JoinHandle<()>>) -> bool {
        if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("previous flush still in flight, skipping");
            return false;
        }

        let session = Arc::clone(&self.session);
        let week = Arc::clone(&self.week);
        *in_flight = Some(tokio::spawn(async move {
            flush_tick(session, week).await;
        }));
        true
    }
}

/// Record the running segment if it is old enough, then refresh the
/// weekly total.
async fn flush_tick<K, T, N, C>(
    session: Arc<TimerSession<K, T, N, C>>,
    week: Arc<RwLock<Option<WeekSummary>>>,
) where
    K: KeyValueStore,
    T: Transport,
    N: Notifier,
    C: Clock,
{
    match session.auto_flush().await {
        Ok(Some(receipt)) if !receipt.synced => {
            tracing::warn!(
                duration_ms = receipt.segment.duration_ms(),
                "segment recorded locally only"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("auto-flush failed: {}", e),
    }

    match session.week_summary().await {
        Ok(summary) => {
            *week.write().unwrap_or_else(PoisonError::into_inner) = Some(summary);
        }
        Err(e) => tracing::error!("failed to refresh weekly hours: {}", e),
    }
}
