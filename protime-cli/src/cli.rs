use clap::{Args, Parser, Subcommand};
use protime_core::models::{
    PlanHint, ProgressKey, ProjectId, TaskRef, WorkflowStatus, UNKNOWN_PROJECT_NAME,
};
use time::{macros::format_description, Date};

#[derive(Debug, Parser)]
#[command(name = "protime")]
#[command(about = "Local work timer with best-effort sync to the ProTime API", version)]
pub struct Cli {
    /// Verbose logging (same as RUST_LOG=protime=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the timer for a task
    Start(StartArgs),
    /// Stop the running timer and record its segment
    Pause,
    /// Record the running segment now if it is old enough
    Flush,
    /// Show the running timer, task progress and weekly hours
    Status(StatusArgs),
    /// Submit a task for supervisor approval (pauses it if running)
    Submit(TaskArgs),
    /// Approve or reject a submission
    Decide(DecideArgs),
    /// Change the planned minutes of a task
    Plan {
        #[command(flatten)]
        task: TaskArgs,
        /// New plan in minutes
        minutes: u32,
    },
    /// Zero the recorded time of a task, keeping its plan
    Reset(TaskArgs),
    /// Keep the timer reconciled in the foreground until Ctrl-C
    Run,
    /// List submissions waiting for approval
    Pending,
    /// Store or read back report filters for the next report run
    Prefill(PrefillArgs),
    /// Save API credentials
    Login {
        /// User id the local timer state belongs to
        #[arg(long)]
        user: String,
        /// Bearer token for the API
        #[arg(long)]
        token: String,
    },
    /// Remove saved credentials
    Logout,
    /// Print config path and create default file if missing
    ConfigPath,
}

/// Identifies a task, or a project tracked as a single task.
#[derive(Debug, Clone, Args)]
pub struct TaskArgs {
    /// Project id
    #[arg(long)]
    pub project: String,
    /// Project display name
    #[arg(long, default_value = "")]
    pub project_name: String,
    /// Task id; omit for a project without a task list
    #[arg(long)]
    pub task: Option<String>,
    /// Task display name
    #[arg(long, default_value = "")]
    pub task_name: String,
    /// Current remote status of the task, e.g. "Not Started"
    #[arg(long, value_parser = parse_status)]
    pub status: Option<WorkflowStatus>,
}

impl TaskArgs {
    pub fn to_task_ref(&self) -> TaskRef {
        let task = match &self.task {
            Some(task_id) => TaskRef::task(
                self.project.as_str(),
                self.project_name.as_str(),
                task_id.as_str(),
                self.task_name.as_str(),
            ),
            None => TaskRef::project_level(self.project.as_str(), self.project_name.as_str()),
        };
        match self.status {
            Some(status) => task.with_status(status),
            None => task,
        }
    }

    pub fn progress_key(&self) -> ProgressKey {
        self.to_task_ref().progress_key()
    }
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    #[command(flatten)]
    pub task: TaskArgs,
    /// Project budget in hours; wins over task estimates
    #[arg(long)]
    pub budget_hours: Option<f64>,
    /// Task estimate in minutes
    #[arg(long)]
    pub estimated_minutes: Option<u32>,
    /// Task estimate in hours
    #[arg(long)]
    pub estimated_hours: Option<f64>,
    /// Projects currently assigned to you; a running timer on any other
    /// project is dropped before starting
    #[arg(long, value_delimiter = ',')]
    pub assigned: Vec<String>,
}

impl StartArgs {
    pub fn to_task_ref(&self) -> TaskRef {
        self.task.to_task_ref().with_plan(PlanHint {
            project_budget_hours: self.budget_hours,
            estimated_minutes: self.estimated_minutes,
            estimated_hours: self.estimated_hours,
        })
    }

    pub fn assigned_projects(&self) -> Vec<ProjectId> {
        self.assigned
            .iter()
            .map(|p| ProjectId::from(p.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Also show progress of this project
    #[arg(long)]
    pub project: Option<String>,
    /// ...and this task of it
    #[arg(long, requires = "project")]
    pub task: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct DecideArgs {
    #[arg(long)]
    pub project: String,
    #[arg(long, default_value = UNKNOWN_PROJECT_NAME)]
    pub project_name: String,
    /// Task id; omit for a project-level submission
    #[arg(long)]
    pub task: Option<String>,
    #[arg(long, default_value = "")]
    pub task_name: String,
    #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
    pub approve: bool,
    #[arg(long)]
    pub reject: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PrefillArgs {
    /// Print and clear the stored filters instead of setting them
    #[arg(long, conflicts_with_all = ["project", "from", "to"])]
    pub take: bool,
    #[arg(long)]
    pub project: Option<String>,
    /// First day, YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    pub from: Option<Date>,
    /// Last day, YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    pub to: Option<Date>,
}

fn parse_status(raw: &str) -> Result<WorkflowStatus, String> {
    WorkflowStatus::normalize(raw).ok_or_else(|| format!("unknown status {raw:?}"))
}

fn parse_date(raw: &str) -> Result<Date, String> {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).map_err(|e| e.to_string())
}
