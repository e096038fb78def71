use crate::domain::{
    models::format_hms,
    ports::outbound::{Notice, Notifier},
};

/// Delivers notices as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::PlanAlmostExhausted {
                project_name,
                task_name,
                remaining_ms,
            } => tracing::warn!(
                project = %project_name,
                task = %task_name,
                "{} remaining before planned time is used up",
                format_hms(*remaining_ms)
            ),
            Notice::RemoteUnconfirmed { action, attempts } => tracing::warn!(
                action = %action,
                attempts,
                "not confirmed by the server, recorded locally"
            ),
        }
    }
}
