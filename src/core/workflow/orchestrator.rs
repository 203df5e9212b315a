//! Sequences the pipeline for one run.
//!
//! Discovery runs first. Each candidate then goes through
//! {ResumeOptimize ∥ CoverLetter} → Submit in its own task, bounded by a
//! semaphore of `max_concurrent_candidates`. Notify runs once at the end.
//! Candidate tasks get owned snapshots of what they need and hand their
//! outputs back; only the run itself mutates the [`WorkflowContext`].

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::stages::{StageContext, StageEffect, StageExecutor, StageOutput};
use super::types::{
    Candidate, CandidateArtifacts, Extensions, Stage, StageResult, StageTimeouts,
    SubmissionOutcome, WorkflowContext, WorkflowCriteria, WorkflowResult, WorkflowStatus,
};
use crate::core::error::{ErrorKind, StageError};
use crate::core::scheduler::WorkflowRunner;
use crate::core::store::WorkflowStore;

/// The five stage executors of the pipeline.
#[derive(Clone)]
pub struct StageSet {
    pub discovery: Arc<dyn StageExecutor>,
    pub resume: Arc<dyn StageExecutor>,
    pub cover_letter: Arc<dyn StageExecutor>,
    pub submit: Arc<dyn StageExecutor>,
    pub notify: Arc<dyn StageExecutor>,
}

pub struct WorkflowOrchestrator {
    stages: StageSet,
    store: Arc<WorkflowStore>,
}

/// Everything one candidate produced.
struct CandidateOutcome {
    results: Vec<StageResult>,
    artifacts: CandidateArtifacts,
    submission: Option<SubmissionOutcome>,
    extensions: Extensions,
}

impl CandidateOutcome {
    fn skipped(candidate_id: &str, kind: ErrorKind, reason: &str) -> Self {
        Self {
            results: [Stage::ResumeOptimize, Stage::CoverLetter, Stage::Submit]
                .into_iter()
                .map(|stage| StageResult::skipped(stage, Some(candidate_id), kind, reason))
                .collect(),
            artifacts: CandidateArtifacts::default(),
            submission: None,
            extensions: Extensions::new(),
        }
    }

    fn crashed(candidate_id: &str, message: &str) -> Self {
        Self {
            results: [Stage::ResumeOptimize, Stage::CoverLetter, Stage::Submit]
                .into_iter()
                .map(|stage| {
                    StageResult::failed(
                        stage,
                        Some(candidate_id),
                        Duration::ZERO,
                        StageError::internal(message),
                    )
                })
                .collect(),
            artifacts: CandidateArtifacts::default(),
            submission: None,
            extensions: Extensions::new(),
        }
    }
}

/// Owned inputs of one candidate task.
struct CandidateJob {
    workflow_id: String,
    criteria: Arc<WorkflowCriteria>,
    candidates: Arc<Vec<Candidate>>,
    index: usize,
    extensions: Arc<Extensions>,
    stages: StageSet,
    timeouts: StageTimeouts,
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one stage with its timeout, converting errors and panics into a
/// failed [`StageResult`]. The output is returned only on success.
async fn run_stage(
    executor: &dyn StageExecutor,
    ctx: &StageContext<'_>,
    timeout: Duration,
) -> (StageResult, Option<StageOutput>) {
    let stage = executor.stage();
    let candidate_id = ctx.candidate.map(|c| c.id.as_str());
    let started = Instant::now();

    let attempt = AssertUnwindSafe(executor.execute(ctx)).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, attempt).await {
        Err(_) => Err(StageError::timeout(format!(
            "{} exceeded {}s",
            stage,
            timeout.as_secs()
        ))),
        Ok(Err(panic)) => Err(StageError::internal(format!(
            "{} panicked: {}",
            stage,
            panic_message(panic)
        ))),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Ok(Ok(output))) if output.effect.stage() != stage => Err(StageError::internal(format!(
            "{} returned output for {}",
            stage,
            output.effect.stage()
        ))),
        Ok(Ok(Ok(output))) => Ok(output),
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(output) => {
            info!(
                workflow_id = ctx.workflow_id,
                candidate_id = candidate_id.unwrap_or("-"),
                stage = %stage,
                elapsed_ms = elapsed.as_millis() as u64,
                "Stage succeeded"
            );
            let result = StageResult::succeeded(stage, candidate_id, elapsed, output.payload.clone());
            (result, Some(output))
        }
        Err(e) => {
            warn!(
                workflow_id = ctx.workflow_id,
                candidate_id = candidate_id.unwrap_or("-"),
                stage = %stage,
                kind = %e.kind,
                "Stage failed: {}",
                e.message
            );
            (StageResult::failed(stage, candidate_id, elapsed, e), None)
        }
    }
}

async fn run_candidate(job: CandidateJob) -> CandidateOutcome {
    let candidate = &job.candidates[job.index];
    let no_results: [StageResult; 0] = [];
    let no_submissions: [SubmissionOutcome; 0] = [];
    let view = StageContext {
        workflow_id: &job.workflow_id,
        criteria: &job.criteria,
        candidates: &job.candidates,
        candidate: Some(candidate),
        artifacts: None,
        submissions: &no_submissions,
        results: &no_results,
        extensions: &job.extensions,
    };

    let ((resume_result, resume_out), (cover_result, cover_out)) = tokio::join!(
        run_stage(
            job.stages.resume.as_ref(),
            &view,
            job.timeouts.for_stage(Stage::ResumeOptimize)
        ),
        run_stage(
            job.stages.cover_letter.as_ref(),
            &view,
            job.timeouts.for_stage(Stage::CoverLetter)
        ),
    );

    let mut artifacts = CandidateArtifacts::default();
    let mut extensions = Extensions::new();
    for output in [resume_out, cover_out].into_iter().flatten() {
        extensions.extend(output.extensions);
        match output.effect {
            StageEffect::Resume(text) => artifacts.resume = Some(text),
            StageEffect::CoverLetter(text) => artifacts.cover_letter = Some(text),
            _ => {}
        }
    }

    let mut submission = None;
    let submit_result = if resume_result.success && cover_result.success {
        let submit_view = StageContext {
            artifacts: Some(&artifacts),
            ..view
        };
        let (result, output) = run_stage(
            job.stages.submit.as_ref(),
            &submit_view,
            job.timeouts.for_stage(Stage::Submit),
        )
        .await;
        if let Some(output) = output {
            extensions.extend(output.extensions);
            if let StageEffect::Submitted(outcome) = output.effect {
                submission = Some(outcome);
            }
        }
        result
    } else {
        let failed = if resume_result.success {
            Stage::CoverLetter
        } else {
            Stage::ResumeOptimize
        };
        StageResult::skipped(
            Stage::Submit,
            Some(&candidate.id),
            ErrorKind::Skipped,
            &format!("{} failed", failed),
        )
    };

    CandidateOutcome {
        results: vec![resume_result, cover_result, submit_result],
        artifacts,
        submission,
        extensions,
    }
}

/// Status of a finished run.
pub fn compute_status(stages: &[StageResult], cancelled: bool) -> WorkflowStatus {
    if cancelled {
        return WorkflowStatus::Cancelled;
    }
    if stages
        .iter()
        .any(|s| s.stage == Stage::Discovery && !s.success)
    {
        return WorkflowStatus::Failed;
    }
    if stages.iter().all(|s| s.success) {
        return WorkflowStatus::Succeeded;
    }
    let submits = || stages.iter().filter(|s| s.stage == Stage::Submit);
    if submits().any(|s| s.success) && submits().any(|s| !s.success) {
        return WorkflowStatus::PartialFailure;
    }
    WorkflowStatus::Failed
}

impl WorkflowOrchestrator {
    pub fn new(stages: StageSet, store: Arc<WorkflowStore>) -> Self {
        Self { stages, store }
    }

    pub fn store(&self) -> &Arc<WorkflowStore> {
        &self.store
    }

    pub async fn run(&self, criteria: WorkflowCriteria) -> WorkflowResult {
        self.run_with_cancel(criteria, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        criteria: WorkflowCriteria,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut result =
            WorkflowResult::running(workflow_id.clone(), criteria.owner_id.clone(), started_at);

        if let Err(e) = criteria.validate() {
            warn!(workflow_id = %workflow_id, "Rejected workflow criteria: {}", e.message);
            result.stages.push(StageResult::failed(Stage::Setup, None, Duration::ZERO, e));
            return self.finish(result, WorkflowStatus::Failed).await;
        }

        if let Err(e) = self.store.put(result.clone()).await {
            error!(workflow_id = %workflow_id, "Workflow store unavailable: {}", e);
            result.stages.push(StageResult::failed(
                Stage::Setup,
                None,
                Duration::ZERO,
                StageError::infrastructure(e.to_string()),
            ));
            result.status = WorkflowStatus::Failed;
            result.finished_at = Some(Utc::now());
            return result;
        }
        info!(workflow_id = %workflow_id, owner_id = %criteria.owner_id, "Workflow started");

        let token = cancel.child_token();
        let deadline = criteria.automation.workflow_timeout_secs.map(|secs| {
            let token = token.clone();
            let workflow_id = workflow_id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        warn!(workflow_id = %workflow_id, "Workflow timeout reached, cancelling");
                        token.cancel();
                    }
                }
            })
        });

        let mut ctx = WorkflowContext::new(workflow_id.clone(), Arc::new(criteria));
        let status = self.execute(&mut ctx, &token).await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        result.candidates_found = ctx.candidates.len();
        result.applications_submitted = ctx.submissions.iter().filter(|s| !s.dry_run).count();
        result.stages = std::mem::take(&mut ctx.stage_results);
        self.finish(result, status).await
    }

    async fn execute(&self, ctx: &mut WorkflowContext, token: &CancellationToken) -> WorkflowStatus {
        let timeouts = ctx.criteria.automation.stage_timeouts.clone();

        if token.is_cancelled() {
            ctx.record(StageResult::skipped(Stage::Discovery, None, ErrorKind::Cancelled, "workflow cancelled"));
            ctx.record(StageResult::skipped(Stage::Notify, None, ErrorKind::Cancelled, "workflow cancelled"));
            return WorkflowStatus::Cancelled;
        }

        // Discovery
        let (discovery, output) = {
            let view = StageContext {
                workflow_id: &ctx.workflow_id,
                criteria: &ctx.criteria,
                candidates: &[],
                candidate: None,
                artifacts: None,
                submissions: &[],
                results: &[],
                extensions: &ctx.extensions,
            };
            run_stage(
                self.stages.discovery.as_ref(),
                &view,
                timeouts.for_stage(Stage::Discovery),
            )
            .await
        };
        ctx.record(discovery);
        match output {
            Some(StageOutput {
                effect: StageEffect::Discovered(candidates),
                extensions,
                ..
            }) => {
                ctx.candidates = candidates;
                ctx.merge_extensions(extensions);
            }
            _ => {
                let cancelled = token.is_cancelled();
                let kind = if cancelled {
                    ErrorKind::Cancelled
                } else {
                    ErrorKind::Skipped
                };
                ctx.record(StageResult::skipped(Stage::Notify, None, kind, "discovery failed"));
                return compute_status(&ctx.stage_results, cancelled);
            }
        }

        // Per-candidate fan-out
        let candidates = Arc::new(ctx.candidates.clone());
        let extensions = Arc::new(ctx.extensions.clone());
        let semaphore = Arc::new(Semaphore::new(ctx.criteria.automation.max_concurrent_candidates));
        let mut set = JoinSet::new();
        for index in 0..candidates.len() {
            let job = CandidateJob {
                workflow_id: ctx.workflow_id.clone(),
                criteria: ctx.criteria.clone(),
                candidates: candidates.clone(),
                index,
                extensions: extensions.clone(),
                stages: self.stages.clone(),
                timeouts: timeouts.clone(),
            };
            let semaphore = semaphore.clone();
            let token = token.clone();
            set.spawn(async move {
                let candidate_id = job.candidates[index].id.clone();
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let outcome = match permit {
                    Some(_permit) if !token.is_cancelled() => {
                        match AssertUnwindSafe(run_candidate(job)).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(panic) => CandidateOutcome::crashed(
                                &candidate_id,
                                &format!("candidate task panicked: {}", panic_message(panic)),
                            ),
                        }
                    }
                    _ => CandidateOutcome::skipped(
                        &candidate_id,
                        ErrorKind::Cancelled,
                        "workflow cancelled before this candidate started",
                    ),
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<CandidateOutcome>> =
            (0..candidates.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!(workflow_id = %ctx.workflow_id, "Candidate task aborted: {}", e),
            }
        }

        // Merge in discovery order.
        for (candidate, outcome) in candidates.iter().zip(outcomes) {
            let outcome = outcome
                .unwrap_or_else(|| CandidateOutcome::crashed(&candidate.id, "candidate task aborted"));
            for r in outcome.results {
                ctx.record(r);
            }
            if outcome.artifacts != CandidateArtifacts::default() {
                ctx.artifacts.insert(candidate.id.clone(), outcome.artifacts);
            }
            ctx.submissions.extend(outcome.submission);
            ctx.merge_extensions(outcome.extensions);
        }

        // Notify
        let cancelled = token.is_cancelled();
        if cancelled {
            ctx.record(StageResult::skipped(Stage::Notify, None, ErrorKind::Cancelled, "workflow cancelled"));
        } else {
            let (notify, _) = {
                let view = StageContext {
                    workflow_id: &ctx.workflow_id,
                    criteria: &ctx.criteria,
                    candidates: &ctx.candidates,
                    candidate: None,
                    artifacts: None,
                    submissions: &ctx.submissions,
                    results: &ctx.stage_results,
                    extensions: &ctx.extensions,
                };
                run_stage(self.stages.notify.as_ref(), &view, timeouts.for_stage(Stage::Notify)).await
            };
            ctx.record(notify);
        }

        compute_status(&ctx.stage_results, cancelled)
    }

    /// Stamp the terminal status and store the result. An archive failure
    /// turns the run into `Failed` with a `Finalize` record.
    async fn finish(&self, mut result: WorkflowResult, status: WorkflowStatus) -> WorkflowResult {
        result.status = status;
        result.finished_at = Some(Utc::now());

        if let Err(e) = self.store.put(result.clone()).await {
            error!(workflow_id = %result.workflow_id, "Storing workflow result failed: {}", e);
            result.stages.push(StageResult::failed(
                Stage::Finalize,
                None,
                Duration::ZERO,
                StageError::infrastructure(e.to_string()),
            ));
            result.status = WorkflowStatus::Failed;
            if let Err(e) = self.store.put_resident(result.clone()) {
                error!(workflow_id = %result.workflow_id, "Workflow store unavailable: {}", e);
            }
        }

        info!(
            workflow_id = %result.workflow_id,
            status = result.status.as_str(),
            candidates = result.candidates_found,
            submitted = result.applications_submitted,
            "Workflow finished"
        );
        result
    }
}

#[async_trait]
impl WorkflowRunner for WorkflowOrchestrator {
    async fn run_workflow(&self, criteria: WorkflowCriteria, cancel: CancellationToken) -> WorkflowResult {
        self.run_with_cancel(criteria, cancel).await
    }
}
