use chrono::Utc;
use std::sync::Arc;

use super::{HarnessBuilder, TestGenerator, job, rejecting_tier, supplied};
use crate::core::automation::{BackendTier, BrowserAction, full_capabilities};
use crate::core::automation::simulated::SimulationBackend;
use crate::core::error::ErrorKind;
use crate::core::persistence::types::{ApplicationRecord, ApplicationStatus, OwnerProfile};
use crate::core::workflow::{Candidate, Stage, WorkflowCriteria, WorkflowStatus};

fn id_of(n: usize) -> String {
    Candidate::derive_id(&job(n).url)
}

#[tokio::test]
async fn every_supplied_candidate_is_applied_to() {
    let h = HarnessBuilder::new().build();
    let result = h.orchestrator.run(supplied("owner-a", 3)).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.stages.len(), 3 * 3 + 2);
    assert!(result.stages.iter().all(|s| s.success && !s.skipped));
    assert_eq!(result.candidates_found, 3);
    assert_eq!(result.applications_submitted, 3);
    assert!(result.finished_at.is_some());

    assert_eq!(result.stages[0].stage, Stage::Discovery);
    assert_eq!(result.stages[0].payload["source"], "supplied");
    assert_eq!(result.stages[10].stage, Stage::Notify);
    for (i, chunk) in result.stages[1..10].chunks(3).enumerate() {
        let stages: Vec<Stage> = chunk.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::ResumeOptimize, Stage::CoverLetter, Stage::Submit]
        );
        let expected = id_of(i + 1);
        assert!(chunk.iter().all(|s| s.candidate_id.as_deref() == Some(expected.as_str())));
    }

    let stored = h.orchestrator.store().get(&result.workflow_id).unwrap();
    assert_eq!(stored.status, WorkflowStatus::Succeeded);
    let archived = h.db.get_result(&result.workflow_id).await.unwrap().unwrap();
    assert_eq!(archived.stages.len(), 11);

    let history = h.db.list_applications("owner-a").await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|a| a.status == ApplicationStatus::Submitted));

    let clicks = h
        .simulation
        .performed()
        .iter()
        .filter(|a| matches!(a, BrowserAction::Click { .. }))
        .count();
    assert_eq!(clicks, 3);
}

#[tokio::test]
async fn one_failed_submission_is_a_partial_failure() {
    let h = HarnessBuilder::new()
        .tiers(vec![rejecting_tier(1, "/2")])
        .build();
    let result = h.orchestrator.run(supplied("owner-b", 3)).await;

    assert_eq!(result.status, WorkflowStatus::PartialFailure);
    assert_eq!(result.applications_submitted, 2);
    let failed = result.stage_for(Stage::Submit, &id_of(2)).unwrap();
    assert!(!failed.success);
    assert!(!failed.skipped);
    assert_eq!(failed.error_kind(), Some(ErrorKind::AllBackendsExhausted));
    assert!(result.stage_for(Stage::Submit, &id_of(1)).unwrap().success);
    assert!(result.stage_for(Stage::Submit, &id_of(3)).unwrap().success);
    assert_eq!(result.submit_results().filter(|s| s.success).count(), 2);
}

#[tokio::test]
async fn exhausted_tiers_fail_the_run() {
    let h = HarnessBuilder::new()
        .tiers(vec![
            rejecting_tier(1, "https://"),
            rejecting_tier(2, "https://"),
        ])
        .build();
    let result = h.orchestrator.run(supplied("owner-c", 3)).await;

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(result.applications_submitted, 0);
    assert_eq!(result.submit_results().count(), 3);
    assert!(
        result
            .submit_results()
            .all(|s| s.error_kind() == Some(ErrorKind::AllBackendsExhausted))
    );
    // The owner is still told what happened.
    let notify = result.stages.last().unwrap();
    assert_eq!(notify.stage, Stage::Notify);
    assert!(notify.success);
    assert!(h.db.list_applications("owner-c").await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_tier_falls_back_to_the_next_rank() {
    let simulation = Arc::new(SimulationBackend::new());
    let h = HarnessBuilder::new()
        .tiers(vec![
            rejecting_tier(1, "jobs.example.com"),
            BackendTier::new(2, "simulation", full_capabilities(), simulation.clone()),
        ])
        .build();
    let result = h.orchestrator.run(supplied("owner-d", 2)).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    for submit in result.submit_results() {
        assert_eq!(submit.payload["serviced_by"], "simulation");
        assert_eq!(submit.payload["tier_rank"], 2);
    }
    assert!(!simulation.performed().is_empty());
}

#[tokio::test]
async fn generated_candidates_flow_through_the_pipeline() {
    let discovery = "Two matches:\n```json\n{\"jobs\": [\
        {\"title\": \"Rust Engineer\", \"company\": \"Ferrous\", \"url\": \"https://ferrous.example/1\"},\
        {\"title\": \"SRE\", \"company\": \"Oxide\", \"url\": \"https://oxide.example/2\"}\
    ]}\n```";
    let h = HarnessBuilder::new()
        .generator(TestGenerator {
            discovery: Some(discovery.to_string()),
            ..TestGenerator::default()
        })
        .build();
    let mut criteria = WorkflowCriteria::new("owner-e");
    criteria.search.title = Some("Rust".into());
    let result = h.orchestrator.run(criteria).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.candidates_found, 2);
    assert_eq!(result.stages.len(), 8);
    assert_eq!(result.stages[0].payload["source"], "generated");
}

#[tokio::test]
async fn empty_supplied_list_falls_back_to_search() {
    let discovery = "```json\n[{\"title\": \"Rust Engineer\", \"company\": \"Ferrous\", \"url\": \"https://ferrous.example/1\"}]\n```";
    let h = HarnessBuilder::new()
        .generator(TestGenerator {
            discovery: Some(discovery.to_string()),
            ..TestGenerator::default()
        })
        .build();
    let mut criteria = WorkflowCriteria::new("owner-e2");
    criteria.search.title = Some("Rust".into());
    criteria.candidates = Some(Vec::new());
    let result = h.orchestrator.run(criteria).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.candidates_found, 1);
    assert_eq!(result.applications_submitted, 1);
    assert_eq!(result.stages[0].payload["source"], "generated");
}

#[tokio::test]
async fn empty_discovery_still_succeeds() {
    let h = HarnessBuilder::new().build();
    let mut criteria = WorkflowCriteria::new("owner-f");
    criteria.search.location = Some("Berlin".into());
    let result = h.orchestrator.run(criteria).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.candidates_found, 0);
    let stages: Vec<Stage> = result.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![Stage::Discovery, Stage::Notify]);
}

#[tokio::test]
async fn known_and_duplicate_postings_are_dropped() {
    let h = HarnessBuilder::new().build();
    h.db.record_application(&ApplicationRecord {
        owner_id: "owner-g".into(),
        workflow_id: "earlier".into(),
        candidate_id: id_of(1),
        job_url: job(1).url,
        company: job(1).company,
        title: job(1).title,
        status: ApplicationStatus::Submitted,
        serviced_by: Some("simulation".into()),
        applied_at: Utc::now(),
    })
    .await
    .unwrap();

    let criteria = WorkflowCriteria::new("owner-g").with_candidates(vec![job(1), job(2), job(2)]);
    let result = h.orchestrator.run(criteria).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.candidates_found, 1);
    let discovery = &result.stages[0].payload;
    assert_eq!(discovery["skipped_already_applied"], 1);
    assert_eq!(discovery["duplicates_dropped"], 1);
    assert!(result.stage_for(Stage::Submit, &id_of(2)).unwrap().success);
}

#[tokio::test]
async fn dry_run_fills_forms_without_submitting() {
    let h = HarnessBuilder::new().build();
    h.db.upsert_profile(&OwnerProfile {
        owner_id: "owner-h".into(),
        display_name: Some("Ada Lovelace".into()),
        email: Some("ada@example.com".into()),
        ..OwnerProfile::default()
    })
    .await
    .unwrap();

    let mut criteria = supplied("owner-h", 2);
    criteria.automation.dry_run = true;
    let result = h.orchestrator.run(criteria).await;

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.applications_submitted, 0);
    assert!(result.submit_results().all(|s| s.payload["dry_run"] == true));

    let performed = h.simulation.performed();
    assert!(!performed.iter().any(|a| matches!(a, BrowserAction::Click { .. })));
    assert!(performed.iter().any(
        |a| matches!(a, BrowserAction::Type { text, .. } if text == "Ada Lovelace")
    ));

    let history = h.db.list_applications("owner-h").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.status == ApplicationStatus::DryRun));

    // A dry run does not count as having applied.
    let again = h.orchestrator.run(supplied("owner-h", 2)).await;
    assert_eq!(again.candidates_found, 2);
}
