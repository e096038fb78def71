use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::Date;

/// First day of the reporting week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

impl WeekStart {
    /// The first day of the week containing `date`.
    pub fn week_of(self, date: Date) -> Date {
        let offset = match self {
            WeekStart::Sunday => date.weekday().number_days_from_sunday(),
            WeekStart::Monday => date.weekday().number_days_from_monday(),
        };
        date - time::Duration::days(i64::from(offset))
    }
}

/// Tuning of the timer engine and its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Minimum age of the unflushed segment before an auto-flush records it.
    pub flush_threshold_secs: u64,
    /// Period of the flush tick.
    pub flush_interval_secs: u64,
    /// Period of the UI tick.
    pub ui_tick_millis: u64,
    /// Warn when this little planned time is left.
    pub warn_before_secs: u64,
    /// Plan used for tasks that have no plan or estimate.
    pub default_planned_minutes: u32,
    pub week_start: WeekStart,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flush_threshold_secs: 60,
            flush_interval_secs: 30,
            ui_tick_millis: 1_000,
            warn_before_secs: 30,
            default_planned_minutes: 60,
            week_start: WeekStart::default(),
        }
    }
}

impl EngineSettings {
    pub fn flush_threshold_ms(&self) -> u64 {
        self.flush_threshold_secs.saturating_mul(1_000)
    }

    pub fn warn_before_ms(&self) -> u64 {
        self.warn_before_secs.saturating_mul(1_000)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn ui_tick(&self) -> Duration {
        Duration::from_millis(self.ui_tick_millis.max(1))
    }
}
