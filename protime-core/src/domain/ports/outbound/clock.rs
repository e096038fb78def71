use std::fmt;

use time::OffsetDateTime;

/// Wall clock used by the engine.
///
/// Tests inject a manual clock so elapsed-time arithmetic is deterministic.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// Real UTC clock, truncated to whole milliseconds so every persisted
/// instant and every computed duration is millisecond-exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        now.replace_nanosecond(u32::from(now.millisecond()) * 1_000_000)
            .unwrap_or(now)
    }
}
