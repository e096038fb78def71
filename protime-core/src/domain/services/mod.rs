mod fallback;
mod local_store;
mod scheduler;
mod sync_gateway;
mod timer_session;

pub use fallback::{run_fallback, Confirmed};
pub use local_store::LocalTimerStore;
pub use scheduler::{ReconciliationScheduler, SchedulerMessage, TickReport};
pub use sync_gateway::{
    decision_chain, dedupe_pending, pending_chain, project_status_chain, project_tasks_chain,
    projects_chain, submit_task_chain, submit_virtual_chain, task_status_chain,
    weekly_hours_chain, SyncGateway,
};
pub use timer_session::TimerSession;
