use serde::Serialize;

/// Something the user should be told about right away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    /// The running task is about to use up its planned time.
    PlanAlmostExhausted {
        project_name: String,
        task_name: String,
        remaining_ms: u64,
    },
    /// A user-initiated remote action failed on every endpoint; it is
    /// recorded locally only.
    RemoteUnconfirmed { action: String, attempts: usize },
}

/// Outbound port for user notifications.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notice: &Notice);
}
