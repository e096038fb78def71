//! Local timer and task-progress reconciliation engine.
//!
//! Tracks one active work session per user, accumulates elapsed time across
//! pause/resume/reload cycles, persists it locally, flushes completed
//! segments to a remote time-entry log and derives remaining/overtime/weekly
//! figures. Local state is authoritative; the remote API is best-effort.

pub mod adapters;
pub mod config;
pub mod domain;

pub use config::{EngineSettings, WeekStart};
pub use domain::models;
pub use domain::ports::{inbound::TimerService, outbound::*};
pub use domain::services::{
    LocalTimerStore, ReconciliationScheduler, SchedulerMessage, SyncGateway, TickReport,
    TimerSession,
};
pub use domain::{FallbackError, StoreError, TimerError, TransportError};
