use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use super::{elapsed_ms, ActiveTimer, ProjectId, DEFAULT_TASK_NAME};

pub const PAUSE_DESCRIPTION: &str = "Timer segment";
pub const AUTO_FLUSH_DESCRIPTION: &str = "Auto-save timer segment";

const MS_PER_HOUR: f64 = 3_600_000.0;

/// One contiguous interval of running time, as posted to the remote log.
///
/// Not persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSegment {
    pub project: ProjectId,
    pub task_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub description: String,
    pub is_break: bool,
}

impl TimeSegment {
    /// The unflushed segment of `timer` ending at `end`.
    ///
    /// If the clock went backwards the segment is empty rather than inverted.
    pub fn unflushed(timer: &ActiveTimer, end: OffsetDateTime, description: &str) -> Self {
        let start = timer.last_saved_at;
        Self {
            project: timer.project_id.clone(),
            task_name: if timer.task_name.is_empty() {
                DEFAULT_TASK_NAME.to_string()
            } else {
                timer.task_name.clone()
            },
            start_time: start,
            end_time: end.max(start),
            description: description.to_string(),
            is_break: false,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        elapsed_ms(self.start_time, self.end_time)
    }
}

/// Outcome of recording a segment: local accounting always happened,
/// `synced` says whether the remote log accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReceipt {
    pub segment: TimeSegment,
    pub synced: bool,
}

/// Hours worked in one week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekSummary {
    pub week_start: Date,
    /// Total reported by the remote API; `None` when it could not be reached.
    pub remote_hours: Option<f64>,
    /// Unflushed running time not yet known to the remote API.
    pub live_ms: u64,
}

impl WeekSummary {
    pub fn total_hours(&self) -> f64 {
        self.remote_hours.unwrap_or(0.0) + self.live_ms as f64 / MS_PER_HOUR
    }
}
