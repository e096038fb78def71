use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::ActiveTimer;

pub const MS_PER_MINUTE: u64 = 60_000;

/// Whole milliseconds from `from` to `to`, clamped at zero.
///
/// Clock skew can put `to` before `from`; that counts as no elapsed time.
pub fn elapsed_ms(from: OffsetDateTime, to: OffsetDateTime) -> u64 {
    let ms = (to - from).whole_milliseconds();
    u64::try_from(ms.max(0)).unwrap_or(u64::MAX)
}

/// Format a duration as `HH:MM:SS`, flooring to whole seconds.
pub fn format_hms(ms: u64) -> String {
    let total = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Durable accumulated time and plan of one task key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    #[serde(default)]
    pub accumulated_ms: u64,
    #[serde(default)]
    pub planned_minutes: Option<u32>,
}

impl TaskProgress {
    pub fn apply(&mut self, patch: ProgressPatch) {
        if let Some(accumulated_ms) = patch.accumulated_ms {
            self.accumulated_ms = accumulated_ms;
        }
        if let Some(planned_minutes) = patch.planned_minutes {
            self.planned_minutes = Some(planned_minutes);
        }
    }
}

/// Partial update merged into a [`TaskProgress`]; `None` fields are left as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressPatch {
    pub accumulated_ms: Option<u64>,
    pub planned_minutes: Option<u32>,
}

impl ProgressPatch {
    pub fn accumulated(ms: u64) -> Self {
        Self {
            accumulated_ms: Some(ms),
            planned_minutes: None,
        }
    }

    pub fn planned(minutes: u32) -> Self {
        Self {
            accumulated_ms: None,
            planned_minutes: Some(minutes),
        }
    }
}

/// Derived time figures for one task at one instant. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub spent_ms: u64,
    pub planned_ms: u64,
    pub remaining_ms: u64,
    pub overtime_ms: u64,
    pub running: bool,
}

impl ProgressView {
    /// Combine stored progress with the running timer (if it belongs to this
    /// task) at `now`.
    ///
    /// The running contribution is the unflushed segment only: flushed
    /// segments are already part of `accumulated_ms`.
    pub fn compute(
        progress: &TaskProgress,
        running: Option<&ActiveTimer>,
        now: OffsetDateTime,
        default_planned_minutes: u32,
    ) -> Self {
        let live_ms = running.map(|t| t.unflushed_ms(now)).unwrap_or(0);
        let spent_ms = progress.accumulated_ms.saturating_add(live_ms);
        let planned_ms = u64::from(progress.planned_minutes.unwrap_or(default_planned_minutes))
            * MS_PER_MINUTE;

        Self {
            spent_ms,
            planned_ms,
            remaining_ms: planned_ms.saturating_sub(spent_ms),
            overtime_ms: spent_ms.saturating_sub(planned_ms),
            running: running.is_some(),
        }
    }
}
