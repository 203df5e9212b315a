use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{ErrorKind, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Discovery,
    ResumeOptimize,
    CoverLetter,
    Submit,
    Notify,
    Finalize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Discovery => "discovery",
            Stage::ResumeOptimize => "resume_optimize",
            Stage::CoverLetter => "cover_letter",
            Stage::Submit => "submit",
            Stage::Notify => "notify",
            Stage::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    PartialFailure,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::PartialFailure => "partial_failure",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(WorkflowStatus::Running),
            "succeeded" => Some(WorkflowStatus::Succeeded),
            "partial_failure" => Some(WorkflowStatus::PartialFailure),
            "failed" => Some(WorkflowStatus::Failed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != WorkflowStatus::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl SearchParams {
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("").is_empty();
        blank(&self.title) && blank(&self.location) && self.filters.is_empty()
    }
}

/// Per-stage timeouts in seconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_discovery_secs")]
    pub discovery_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub resume_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub cover_letter_secs: u64,
    #[serde(default = "default_submit_secs")]
    pub submit_secs: u64,
    #[serde(default = "default_notify_secs")]
    pub notify_secs: u64,
}

fn default_discovery_secs() -> u64 {
    120
}
fn default_generation_secs() -> u64 {
    180
}
fn default_submit_secs() -> u64 {
    300
}
fn default_notify_secs() -> u64 {
    30
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            discovery_secs: default_discovery_secs(),
            resume_secs: default_generation_secs(),
            cover_letter_secs: default_generation_secs(),
            submit_secs: default_submit_secs(),
            notify_secs: default_notify_secs(),
        }
    }
}

impl StageTimeouts {
    pub fn uniform(secs: u64) -> Self {
        Self {
            discovery_secs: secs,
            resume_secs: secs,
            cover_letter_secs: secs,
            submit_secs: secs,
            notify_secs: secs,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Discovery => self.discovery_secs,
            Stage::ResumeOptimize => self.resume_secs,
            Stage::CoverLetter => self.cover_letter_secs,
            Stage::Submit => self.submit_secs,
            Stage::Notify => self.notify_secs,
            Stage::Setup | Stage::Finalize => return Duration::MAX,
        };
        Duration::from_secs(secs)
    }

    fn all(&self) -> [(Stage, u64); 5] {
        [
            (Stage::Discovery, self.discovery_secs),
            (Stage::ResumeOptimize, self.resume_secs),
            (Stage::CoverLetter, self.cover_letter_secs),
            (Stage::Submit, self.submit_secs),
            (Stage::Notify, self.notify_secs),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_candidates: usize,
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
    /// Upper bound for the whole run; expiry cancels remaining candidates.
    #[serde(default)]
    pub workflow_timeout_secs: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_candidates: default_max_concurrent(),
            stage_timeouts: StageTimeouts::default(),
            workflow_timeout_secs: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Candidate {
    /// Stable identifier derived from the application URL.
    pub fn derive_id(url: &str) -> String {
        let digest = Sha256::digest(url.trim().as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    /// Fill in the id from the URL when the source did not provide one.
    pub fn normalized(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = Self::derive_id(&self.url);
        }
        self
    }
}

/// Immutable input of a workflow run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowCriteria {
    pub owner_id: String,
    #[serde(default)]
    pub search: SearchParams,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
}

impl WorkflowCriteria {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            search: SearchParams::default(),
            automation: AutomationConfig::default(),
            candidates: None,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    pub fn validate(&self) -> Result<(), StageError> {
        if self.owner_id.trim().is_empty() {
            return Err(StageError::validation("owner id must not be empty"));
        }
        let supplied = self.candidates.as_ref().map(|c| !c.is_empty()).unwrap_or(false);
        if self.search.is_empty() && !supplied {
            return Err(StageError::validation(
                "criteria need a title, location, filter or a supplied candidate list",
            ));
        }
        if let Some(candidates) = &self.candidates
            && let Some(pos) = candidates.iter().position(|c| c.url.trim().is_empty())
        {
            return Err(StageError::validation(format!(
                "supplied candidate #{} has no application url",
                pos + 1
            )));
        }
        if self.automation.max_concurrent_candidates == 0 {
            return Err(StageError::validation(
                "max_concurrent_candidates must be greater than zero",
            ));
        }
        for (stage, secs) in self.automation.stage_timeouts.all() {
            if secs == 0 {
                return Err(StageError::validation(format!(
                    "{} timeout must be greater than zero",
                    stage
                )));
            }
        }
        if self.automation.workflow_timeout_secs == Some(0) {
            return Err(StageError::validation(
                "workflow timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Generated material for one candidate.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandidateArtifacts {
    pub resume: Option<String>,
    pub cover_letter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubmissionOutcome {
    pub candidate_id: String,
    pub serviced_by: String,
    pub tier_rank: u32,
    pub screenshots: Vec<String>,
    pub dry_run: bool,
}

pub type Extensions = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(default)]
    pub payload: Value,
}

impl StageResult {
    pub fn succeeded(stage: Stage, candidate_id: Option<&str>, elapsed: Duration, payload: Value) -> Self {
        Self {
            stage,
            candidate_id: candidate_id.map(str::to_string),
            success: true,
            skipped: false,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
            payload,
        }
    }

    pub fn failed(stage: Stage, candidate_id: Option<&str>, elapsed: Duration, error: StageError) -> Self {
        Self {
            stage,
            candidate_id: candidate_id.map(str::to_string),
            success: false,
            skipped: false,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(error),
            payload: Value::Null,
        }
    }

    pub fn skipped(stage: Stage, candidate_id: Option<&str>, kind: ErrorKind, reason: &str) -> Self {
        Self {
            stage,
            candidate_id: candidate_id.map(str::to_string),
            success: false,
            skipped: true,
            duration_ms: 0,
            error: Some(StageError::new(kind, reason)),
            payload: Value::Null,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Terminal (or in-progress) record of one run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub owner_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    pub stages: Vec<StageResult>,
    pub candidates_found: usize,
    pub applications_submitted: usize,
}

impl WorkflowResult {
    pub fn running(workflow_id: String, owner_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            owner_id,
            started_at,
            finished_at: None,
            status: WorkflowStatus::Running,
            stages: Vec::new(),
            candidates_found: 0,
            applications_submitted: 0,
        }
    }

    /// Submit results in record order.
    pub fn submit_results(&self) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(|s| s.stage == Stage::Submit)
    }

    pub fn stage_for(&self, stage: Stage, candidate_id: &str) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| s.stage == stage && s.candidate_id.as_deref() == Some(candidate_id))
    }
}

/// Mutable accumulator for one run. Owned by the run; candidate tasks get
/// snapshots and hand their outputs back for merging.
#[derive(Debug)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub criteria: Arc<WorkflowCriteria>,
    pub candidates: Vec<Candidate>,
    pub artifacts: HashMap<String, CandidateArtifacts>,
    pub submissions: Vec<SubmissionOutcome>,
    pub extensions: Extensions,
    pub stage_results: Vec<StageResult>,
}

impl WorkflowContext {
    pub fn new(workflow_id: String, criteria: Arc<WorkflowCriteria>) -> Self {
        Self {
            workflow_id,
            criteria,
            candidates: Vec::new(),
            artifacts: HashMap::new(),
            submissions: Vec::new(),
            extensions: Extensions::new(),
            stage_results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: StageResult) {
        self.stage_results.push(result);
    }

    pub fn merge_extensions(&mut self, values: Extensions) {
        self.extensions.extend(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str) -> Candidate {
        Candidate {
            id: String::new(),
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            location: None,
            url: url.to_string(),
            description: None,
            source: None,
        }
    }

    #[test]
    fn candidate_id_is_derived_from_url() {
        let a = candidate("https://jobs.example.com/1").normalized();
        let b = candidate("https://jobs.example.com/1").normalized();
        let c = candidate("https://jobs.example.com/2").normalized();
        assert_eq!(a.id.len(), 12);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn explicit_candidate_id_is_kept() {
        let mut c = candidate("https://jobs.example.com/1");
        c.id = "job-7".to_string();
        assert_eq!(c.normalized().id, "job-7");
    }

    #[test]
    fn validate_requires_owner() {
        let mut criteria = WorkflowCriteria::new("  ");
        criteria.search.title = Some("Rust".to_string());
        let err = criteria.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn validate_requires_search_or_candidates() {
        let criteria = WorkflowCriteria::new("owner-1");
        assert!(criteria.validate().is_err());

        let supplied = WorkflowCriteria::new("owner-1")
            .with_candidates(vec![candidate("https://jobs.example.com/1")]);
        assert!(supplied.validate().is_ok());

        let mut filtered = WorkflowCriteria::new("owner-1");
        filtered
            .search
            .filters
            .insert("remote".to_string(), "true".to_string());
        assert!(filtered.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut criteria = WorkflowCriteria::new("owner-1");
        criteria.search.title = Some("Rust".to_string());
        criteria.automation.stage_timeouts.submit_secs = 0;
        let err = criteria.validate().unwrap_err();
        assert!(err.message.contains("submit"));

        criteria.automation.stage_timeouts = StageTimeouts::default();
        criteria.automation.workflow_timeout_secs = Some(0);
        assert!(criteria.validate().is_err());
    }

    #[test]
    fn validate_rejects_candidate_without_url() {
        let criteria = WorkflowCriteria::new("owner-1").with_candidates(vec![candidate("  ")]);
        let err = criteria.validate().unwrap_err();
        assert!(err.message.contains("#1"));
    }

    #[test]
    fn criteria_json_uses_defaults() {
        let criteria: WorkflowCriteria =
            serde_json::from_str(r#"{"owner_id":"o1","search":{"title":"SRE"}}"#).unwrap();
        assert_eq!(criteria.automation.max_concurrent_candidates, 3);
        assert_eq!(criteria.automation.stage_timeouts.submit_secs, 300);
        assert!(!criteria.automation.dry_run);
        assert!(criteria.candidates.is_none());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            WorkflowStatus::Running,
            WorkflowStatus::Succeeded,
            WorkflowStatus::PartialFailure,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(WorkflowStatus::from_status(status.as_str()), Some(status));
        }
        assert!(!WorkflowStatus::Running.is_terminal());
    }
}
