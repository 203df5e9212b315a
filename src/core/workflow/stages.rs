//! The five pipeline stages. Each wraps one collaborator (a content generator,
//! the backend selector, the owner store or a notification channel) behind the
//! [`StageExecutor`] trait so the orchestrator can treat them uniformly.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{
    Candidate, CandidateArtifacts, Extensions, Stage, StageResult, SubmissionOutcome,
    WorkflowCriteria,
};
use crate::core::automation::{BackendSelector, BackendTier, BrowserAction};
use crate::core::error::StageError;
use crate::core::generation::{
    ContentGenerator, GenerationRequest, GenerationTask, parse_candidates,
};
use crate::core::notify::{NotificationChannel, NotificationSummary};
use crate::core::persistence::OwnerRecords;
use crate::core::persistence::types::{ApplicationRecord, ApplicationStatus};

pub const OWNER_PROFILE_KEY: &str = "owner_profile";

/// Read-only view of the run handed to a stage.
pub struct StageContext<'a> {
    pub workflow_id: &'a str,
    pub criteria: &'a WorkflowCriteria,
    pub candidates: &'a [Candidate],
    pub candidate: Option<&'a Candidate>,
    pub artifacts: Option<&'a CandidateArtifacts>,
    pub submissions: &'a [SubmissionOutcome],
    pub results: &'a [StageResult],
    pub extensions: &'a Extensions,
}

impl<'a> StageContext<'a> {
    fn require_candidate(&self) -> Result<&'a Candidate, StageError> {
        self.candidate
            .ok_or_else(|| StageError::internal("stage requires a candidate"))
    }

    fn owner_profile(&self) -> Value {
        self.extensions
            .get(OWNER_PROFILE_KEY)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn profile_str(&self, field: &str) -> Option<String> {
        self.extensions
            .get(OWNER_PROFILE_KEY)
            .and_then(|p| p.get(field))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

/// Typed effect a stage has on the run context.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEffect {
    Discovered(Vec<Candidate>),
    Resume(String),
    CoverLetter(String),
    Submitted(SubmissionOutcome),
    Notified,
}

impl StageEffect {
    pub fn stage(&self) -> Stage {
        match self {
            StageEffect::Discovered(_) => Stage::Discovery,
            StageEffect::Resume(_) => Stage::ResumeOptimize,
            StageEffect::CoverLetter(_) => Stage::CoverLetter,
            StageEffect::Submitted(_) => Stage::Submit,
            StageEffect::Notified => Stage::Notify,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub effect: StageEffect,
    pub payload: Value,
    pub extensions: Extensions,
}

impl StageOutput {
    pub fn new(effect: StageEffect, payload: Value) -> Self {
        Self {
            effect,
            payload,
            extensions: Extensions::new(),
        }
    }
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

// ── Discovery ──

pub struct DiscoveryStage {
    generator: Arc<dyn ContentGenerator>,
    owners: Arc<dyn OwnerRecords>,
}

impl DiscoveryStage {
    pub fn new(generator: Arc<dyn ContentGenerator>, owners: Arc<dyn OwnerRecords>) -> Self {
        Self { generator, owners }
    }
}

#[async_trait]
impl StageExecutor for DiscoveryStage {
    fn stage(&self) -> Stage {
        Stage::Discovery
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let owner_id = &ctx.criteria.owner_id;
        let record = self.owners.load(owner_id).await.map_err(|e| {
            StageError::infrastructure(format!("loading owner record failed: {:#}", e))
        })?;
        let profile = serde_json::to_value(&record.profile).unwrap_or(Value::Null);

        let (source, found) = match &ctx.criteria.candidates {
            Some(supplied) if !supplied.is_empty() => (
                "supplied",
                supplied
                    .iter()
                    .cloned()
                    .map(|mut c| {
                        c.source.get_or_insert_with(|| "supplied".to_string());
                        c.normalized()
                    })
                    .collect::<Vec<_>>(),
            ),
            _ => {
                let request = GenerationRequest::new(
                    GenerationTask::Discovery,
                    owner_id.clone(),
                    json!({ "search": ctx.criteria.search, OWNER_PROFILE_KEY: profile }),
                );
                let text = self
                    .generator
                    .generate(&request)
                    .await
                    .map_err(|e| StageError::generation(&e))?;
                let parsed = parse_candidates(&text).map_err(|e| StageError::generation(&e))?;
                (
                    "generated",
                    parsed
                        .into_iter()
                        .map(|mut c| {
                            c.source
                                .get_or_insert_with(|| self.generator.name().to_string());
                            c
                        })
                        .collect(),
                )
            }
        };

        let total = found.len();
        let mut seen = HashSet::new();
        let mut already_applied = 0;
        let mut candidates = Vec::with_capacity(total);
        for candidate in found {
            if record.has_applied_to(&candidate.url) {
                already_applied += 1;
                continue;
            }
            if seen.insert(candidate.id.clone()) {
                candidates.push(candidate);
            }
        }
        let duplicates = total - already_applied - candidates.len();
        info!(
            workflow_id = ctx.workflow_id,
            owner_id = %owner_id,
            source,
            candidates = candidates.len(),
            already_applied,
            duplicates,
            "Discovery finished"
        );

        let payload = json!({
            "source": source,
            "candidates": candidates.len(),
            "skipped_already_applied": already_applied,
            "duplicates_dropped": duplicates,
        });
        let mut output = StageOutput::new(StageEffect::Discovered(candidates), payload);
        output.extensions.insert(OWNER_PROFILE_KEY.to_string(), profile);
        Ok(output)
    }
}

// ── Resume / cover letter ──

fn document_request(ctx: &StageContext<'_>, task: GenerationTask, candidate: &Candidate) -> GenerationRequest {
    GenerationRequest::new(
        task,
        ctx.criteria.owner_id.clone(),
        json!({ OWNER_PROFILE_KEY: ctx.owner_profile(), "search": ctx.criteria.search }),
    )
    .for_candidate(candidate)
}

async fn generate_document(
    generator: &dyn ContentGenerator,
    request: &GenerationRequest,
) -> Result<String, StageError> {
    let text = generator
        .generate(request)
        .await
        .map_err(|e| StageError::generation(&e))?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(StageError::new(
            crate::core::error::ErrorKind::ContentGenerationError,
            "generator returned an empty document",
        ));
    }
    Ok(text)
}

pub struct ResumeStage {
    generator: Arc<dyn ContentGenerator>,
}

impl ResumeStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for ResumeStage {
    fn stage(&self) -> Stage {
        Stage::ResumeOptimize
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let candidate = ctx.require_candidate()?;
        let request = document_request(ctx, GenerationTask::Resume, candidate);
        let text = generate_document(self.generator.as_ref(), &request).await?;
        let payload = json!({ "chars": text.chars().count(), "generator": self.generator.name() });
        Ok(StageOutput::new(StageEffect::Resume(text), payload))
    }
}

pub struct CoverLetterStage {
    generator: Arc<dyn ContentGenerator>,
}

impl CoverLetterStage {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for CoverLetterStage {
    fn stage(&self) -> Stage {
        Stage::CoverLetter
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let candidate = ctx.require_candidate()?;
        let request = document_request(ctx, GenerationTask::CoverLetter, candidate);
        let text = generate_document(self.generator.as_ref(), &request).await?;
        let payload = json!({ "chars": text.chars().count(), "generator": self.generator.name() });
        Ok(StageOutput::new(StageEffect::CoverLetter(text), payload))
    }
}

// ── Submit ──

pub struct SubmitStage {
    selector: BackendSelector,
    tiers: Arc<Vec<BackendTier>>,
    owners: Arc<dyn OwnerRecords>,
    artifacts_dir: PathBuf,
}

impl SubmitStage {
    pub fn new(
        selector: BackendSelector,
        tiers: Arc<Vec<BackendTier>>,
        owners: Arc<dyn OwnerRecords>,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            selector,
            tiers,
            owners,
            artifacts_dir,
        }
    }

    async fn write_resume(
        &self,
        workflow_id: &str,
        candidate: &Candidate,
        resume: &str,
    ) -> Result<PathBuf, StageError> {
        let dir = self.artifacts_dir.join(workflow_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::infrastructure(format!("creating {}: {}", dir.display(), e)))?;
        let path = dir.join(format!("{}-resume.md", candidate.id));
        tokio::fs::write(&path, resume)
            .await
            .map_err(|e| StageError::infrastructure(format!("writing {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

/// Browser steps for one application form.
pub fn application_actions(
    candidate: &Candidate,
    full_name: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
    resume_path: &str,
    cover_letter: &str,
    dry_run: bool,
) -> Vec<BrowserAction> {
    let mut actions = vec![BrowserAction::Navigate {
        url: candidate.url.clone(),
    }];
    for (selector, value) in [
        ("input[name=full_name]", full_name),
        ("input[name=email]", email),
        ("input[name=phone]", phone),
    ] {
        if let Some(value) = value {
            actions.push(BrowserAction::Type {
                selector: selector.to_string(),
                text: value.to_string(),
            });
        }
    }
    actions.push(BrowserAction::Upload {
        selector: "input[type=file][name=resume]".to_string(),
        path: resume_path.to_string(),
    });
    actions.push(BrowserAction::Type {
        selector: "textarea[name=cover_letter]".to_string(),
        text: cover_letter.to_string(),
    });
    actions.push(BrowserAction::Screenshot {
        label: format!("{}-filled", candidate.id),
    });
    if !dry_run {
        actions.push(BrowserAction::Click {
            selector: "button[type=submit]".to_string(),
        });
        actions.push(BrowserAction::Screenshot {
            label: format!("{}-confirmation", candidate.id),
        });
    }
    actions
}

#[async_trait]
impl StageExecutor for SubmitStage {
    fn stage(&self) -> Stage {
        Stage::Submit
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let candidate = ctx.require_candidate()?;
        let artifacts = ctx
            .artifacts
            .ok_or_else(|| StageError::internal("submit requires generated documents"))?;
        let (Some(resume), Some(cover_letter)) = (&artifacts.resume, &artifacts.cover_letter) else {
            return Err(StageError::internal("submit requires a resume and a cover letter"));
        };

        let resume_path = self.write_resume(ctx.workflow_id, candidate, resume).await?;
        let dry_run = ctx.criteria.automation.dry_run;
        let actions = application_actions(
            candidate,
            ctx.profile_str("display_name").as_deref(),
            ctx.profile_str("email").as_deref(),
            ctx.profile_str("phone").as_deref(),
            &resume_path.to_string_lossy(),
            cover_letter,
            dry_run,
        );
        debug!(
            workflow_id = ctx.workflow_id,
            candidate_id = %candidate.id,
            steps = actions.len(),
            dry_run,
            "Submitting application"
        );

        let report = self
            .selector
            .execute(&actions, &self.tiers)
            .await
            .map_err(|e| e.to_stage_error())?;

        let outcome = SubmissionOutcome {
            candidate_id: candidate.id.clone(),
            serviced_by: report.serviced_by.clone(),
            tier_rank: report.serviced_by_rank,
            screenshots: report.artifacts.clone(),
            dry_run,
        };

        let application = ApplicationRecord {
            owner_id: ctx.criteria.owner_id.clone(),
            workflow_id: ctx.workflow_id.to_string(),
            candidate_id: candidate.id.clone(),
            job_url: candidate.url.clone(),
            company: candidate.company.clone(),
            title: candidate.title.clone(),
            status: if dry_run {
                ApplicationStatus::DryRun
            } else {
                ApplicationStatus::Submitted
            },
            serviced_by: Some(report.serviced_by.clone()),
            applied_at: Utc::now(),
        };
        // The form is already submitted; a history write failure must not fail the stage.
        let history_saved = match self.owners.save(&application).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    workflow_id = ctx.workflow_id,
                    candidate_id = %candidate.id,
                    "Failed to record application history: {:#}",
                    e
                );
                false
            }
        };

        let payload = json!({
            "serviced_by": report.serviced_by,
            "tier_rank": report.serviced_by_rank,
            "actions": report.actions_performed,
            "screenshots": report.artifacts,
            "resume_path": resume_path.to_string_lossy(),
            "dry_run": dry_run,
            "history_saved": history_saved,
            "attempts": report.attempts,
        });
        Ok(StageOutput::new(StageEffect::Submitted(outcome), payload))
    }
}

// ── Notify ──

pub struct NotifyStage {
    generator: Arc<dyn ContentGenerator>,
    channel: Arc<dyn NotificationChannel>,
}

impl NotifyStage {
    pub fn new(generator: Arc<dyn ContentGenerator>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self { generator, channel }
    }
}

#[async_trait]
impl StageExecutor for NotifyStage {
    fn stage(&self) -> Stage {
        Stage::Notify
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let submitted = ctx.submissions.iter().filter(|s| !s.dry_run).count();
        let failures = ctx.results.iter().filter(|r| !r.success).count();
        let fallback = format!(
            "{} of {} applications submitted ({} stage failures).",
            submitted,
            ctx.candidates.len(),
            failures
        );

        let request = GenerationRequest::new(
            GenerationTask::NotificationSummary,
            ctx.criteria.owner_id.clone(),
            json!({
                "status": if failures == 0 { "succeeded" } else { "with_failures" },
                "candidates": ctx.candidates.len(),
                "submitted": submitted,
                "failures": failures,
                "companies": ctx.candidates.iter().map(|c| c.company.as_str()).collect::<Vec<_>>(),
            }),
        );
        let message = match self.generator.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                warn!(workflow_id = ctx.workflow_id, "Summary generation failed, using plain summary: {:#}", e);
                fallback
            }
        };

        let summary = NotificationSummary {
            workflow_id: ctx.workflow_id.to_string(),
            owner_id: ctx.criteria.owner_id.clone(),
            candidates_found: ctx.candidates.len(),
            applications_submitted: submitted,
            failures,
            message,
        };
        let delivered = match self.channel.send(&ctx.criteria.owner_id, &summary).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    workflow_id = ctx.workflow_id,
                    channel = self.channel.name(),
                    "Notification delivery failed: {:#}",
                    e
                );
                false
            }
        };

        let payload = json!({
            "channel": self.channel.name(),
            "delivered": delivered,
            "message": summary.message,
        });
        Ok(StageOutput::new(StageEffect::Notified, payload))
    }
}
