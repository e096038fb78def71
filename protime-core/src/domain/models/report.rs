use serde::{Deserialize, Serialize};
use time::Date;

use super::ProjectId;

/// Filters handed from the approvals view to the report view.
///
/// Stored locally and read at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPrefill {
    pub project_id: Option<ProjectId>,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
}
