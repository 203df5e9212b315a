use chrono::{DateTime, Utc};

use crate::core::workflow::types::{WorkflowCriteria, WorkflowStatus};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnerProfile {
    pub owner_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub resume: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Submitted,
    DryRun,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::DryRun => "dry_run",
        }
    }

    pub fn from_status(value: &str) -> Self {
        match value {
            "dry_run" => ApplicationStatus::DryRun,
            _ => ApplicationStatus::Submitted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApplicationRecord {
    pub owner_id: String,
    pub workflow_id: String,
    pub candidate_id: String,
    pub job_url: String,
    pub company: String,
    pub title: String,
    pub status: ApplicationStatus,
    pub serviced_by: Option<String>,
    pub applied_at: DateTime<Utc>,
}

/// Profile plus application history, as loaded at discovery time.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct OwnerRecord {
    pub profile: OwnerProfile,
    pub applications: Vec<ApplicationRecord>,
}

impl OwnerRecord {
    /// Whether a real (non dry-run) application to this URL already exists.
    pub fn has_applied_to(&self, url: &str) -> bool {
        let url = url.trim();
        self.applications
            .iter()
            .any(|a| a.status == ApplicationStatus::Submitted && a.job_url.trim() == url)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunRecord {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub finished_at: DateTime<Utc>,
}

/// Persisted form of a schedule entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub owner_id: String,
    pub trigger_kind: String,
    pub trigger_expr: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub history: Vec<RunRecord>,
    pub criteria: WorkflowCriteria,
}
