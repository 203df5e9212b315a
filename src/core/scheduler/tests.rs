use super::*;
use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

fn criteria(owner: &str) -> WorkflowCriteria {
    let mut c = WorkflowCriteria::new(owner);
    c.search.title = Some("Rust Engineer".into());
    c
}

fn outcome(status: WorkflowStatus) -> WorkflowResult {
    let mut r = WorkflowResult::running(uuid::Uuid::new_v4().to_string(), "o1".into(), Utc::now());
    r.status = status;
    r.finished_at = Some(Utc::now());
    r
}

fn daily(id: &str) -> ScheduleEntry {
    ScheduleEntry::new(id, Trigger::cron("0 0 9 * * *").unwrap(), criteria("o1"))
}

fn once_in_past(id: &str) -> ScheduleEntry {
    ScheduleEntry::new(
        id,
        Trigger::once(Utc::now() - Duration::seconds(1)),
        criteria("o1"),
    )
}

#[tokio::test]
async fn cron_entry_never_fires_twice_concurrently() {
    let scheduler = Scheduler::new(3);
    scheduler.register(daily("daily")).await.unwrap();
    let due = scheduler.get("daily").unwrap().next_run.unwrap();

    assert!(scheduler.tick_at(due - Duration::seconds(1)).await.is_empty());

    let fired = scheduler.tick_at(due).await;
    assert_eq!(fired.len(), 1);
    let entry = scheduler.get("daily").unwrap();
    assert_eq!(entry.state, ScheduleState::Firing);
    assert_eq!(entry.last_run, Some(due));
    assert_eq!(entry.next_run, Some(due + Duration::days(1)));

    // The run is still going when the next window arrives.
    assert!(scheduler.tick_at(due + Duration::days(1)).await.is_empty());
    assert!(scheduler.tick_at(due + Duration::days(1)).await.is_empty());

    scheduler
        .complete("daily", &outcome(WorkflowStatus::Succeeded))
        .await
        .unwrap();
    assert_eq!(scheduler.get("daily").unwrap().state, ScheduleState::Pending);
    assert_eq!(scheduler.tick_at(due + Duration::days(1)).await.len(), 1);
}

#[tokio::test]
async fn different_entries_fire_in_the_same_tick() {
    let scheduler = Scheduler::new(3);
    scheduler.register(once_in_past("a")).await.unwrap();
    scheduler.register(once_in_past("b")).await.unwrap();
    let fired = scheduler.tick_at(Utc::now()).await;
    assert_eq!(fired.len(), 2);
}

#[tokio::test]
async fn one_shot_completes_and_never_fires_again() {
    let db = Database::open_in_memory().unwrap();
    let scheduler = Scheduler::new(3).with_database(db.clone());
    scheduler.register(once_in_past("once")).await.unwrap();
    assert!(db.get_schedule("once").await.unwrap().is_some());

    let fired = scheduler.tick_at(Utc::now()).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].owner_id, "o1");
    assert_eq!(scheduler.get("once").unwrap().next_run, None);

    scheduler
        .complete("once", &outcome(WorkflowStatus::Succeeded))
        .await
        .unwrap();
    let entry = scheduler.get("once").unwrap();
    assert_eq!(entry.state, ScheduleState::Completed);
    assert_eq!(entry.history.len(), 1);
    assert!(db.get_schedule("once").await.unwrap().is_none());

    assert!(scheduler
        .tick_at(Utc::now() + Duration::minutes(30))
        .await
        .is_empty());

    // A completed one-shot survives a database sync even though its row is gone.
    scheduler.sync_from_database().await.unwrap();
    assert_eq!(scheduler.get("once").unwrap().state, ScheduleState::Completed);
}

#[tokio::test]
async fn completed_one_shots_are_evicted_after_retention() {
    let scheduler = Scheduler::new(3);
    for id in ["a", "b", "c"] {
        scheduler.register(once_in_past(id)).await.unwrap();
    }
    assert_eq!(scheduler.tick_at(Utc::now()).await.len(), 3);
    for id in ["a", "b", "c"] {
        scheduler
            .complete(id, &outcome(WorkflowStatus::Succeeded))
            .await
            .unwrap();
    }
    assert_eq!(scheduler.list().len(), 3);

    let later = Utc::now() + Duration::seconds(COMPLETED_RETENTION_SECS + 60);
    assert!(scheduler.tick_at(later).await.is_empty());
    assert!(scheduler.list().is_empty());
}

#[tokio::test]
async fn cancel_from_another_process_during_a_run_sticks() {
    let db = Database::open_in_memory().unwrap();
    let daemon = Scheduler::new(3).with_database(db.clone());
    daemon.register(daily("d")).await.unwrap();
    let due = daemon.get("d").unwrap().next_run.unwrap();
    assert_eq!(daemon.tick_at(due).await.len(), 1);

    let cli = Scheduler::new(3).with_database(db.clone());
    assert!(cli.cancel("d").await.unwrap());

    daemon.sync_from_database().await.unwrap();
    assert_eq!(daemon.get("d").unwrap().state, ScheduleState::Firing);
    daemon
        .complete("d", &outcome(WorkflowStatus::Succeeded))
        .await
        .unwrap();
    assert!(db.get_schedule("d").await.unwrap().is_none());
    assert!(daemon.get("d").is_none());

    daemon.sync_from_database().await.unwrap();
    assert!(daemon.get("d").is_none());
    assert!(daemon.tick_at(due + Duration::days(1)).await.is_empty());
}

#[tokio::test]
async fn cancel_between_sync_and_completion_is_not_undone() {
    let db = Database::open_in_memory().unwrap();
    let daemon = Scheduler::new(3).with_database(db.clone());
    daemon.register(daily("d")).await.unwrap();
    let due = daemon.get("d").unwrap().next_run.unwrap();
    daemon.tick_at(due).await;

    let cli = Scheduler::new(3).with_database(db.clone());
    cli.cancel("d").await.unwrap();
    daemon
        .complete("d", &outcome(WorkflowStatus::Failed))
        .await
        .unwrap();
    assert!(db.get_schedule("d").await.unwrap().is_none());
    assert!(daemon.get("d").is_none());
}

#[tokio::test]
async fn cancel_between_sync_and_tick_does_not_fire() {
    let db = Database::open_in_memory().unwrap();
    let daemon = Scheduler::new(3).with_database(db.clone());
    daemon.register(daily("d")).await.unwrap();
    let due = daemon.get("d").unwrap().next_run.unwrap();

    let cli = Scheduler::new(3).with_database(db.clone());
    cli.cancel("d").await.unwrap();

    assert!(daemon.tick_at(due).await.is_empty());
    assert!(daemon.get("d").is_none());
    assert!(db.get_schedule("d").await.unwrap().is_none());
}

#[tokio::test]
async fn consecutive_failures_disable_until_enabled() {
    let db = Database::open_in_memory().unwrap();
    let scheduler = Scheduler::new(3).with_database(db.clone());
    scheduler.register(daily("flaky")).await.unwrap();

    let mut at = scheduler.get("flaky").unwrap().next_run.unwrap();
    for round in 1..=3 {
        assert_eq!(scheduler.tick_at(at).await.len(), 1, "round {}", round);
        scheduler
            .complete("flaky", &outcome(WorkflowStatus::Failed))
            .await
            .unwrap();
        at += Duration::days(1);
    }

    let entry = scheduler.get("flaky").unwrap();
    assert_eq!(entry.state, ScheduleState::Disabled);
    assert!(!entry.enabled);
    assert_eq!(entry.consecutive_failures, 3);
    assert!(scheduler.tick_at(at).await.is_empty());
    assert!(!db.get_schedule("flaky").await.unwrap().unwrap().enabled);

    assert!(scheduler.enable("flaky").await.unwrap());
    let entry = scheduler.get("flaky").unwrap();
    assert_eq!(entry.state, ScheduleState::Pending);
    assert_eq!(entry.consecutive_failures, 0);
    assert_eq!(scheduler.tick_at(at).await.len(), 1);
}

#[tokio::test]
async fn cancelled_runs_do_not_touch_the_streak() {
    let scheduler = Scheduler::new(3);
    scheduler.register(daily("d")).await.unwrap();
    let mut at = scheduler.get("d").unwrap().next_run.unwrap();

    for status in [
        WorkflowStatus::Failed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ] {
        scheduler.tick_at(at).await;
        scheduler.complete("d", &outcome(status)).await.unwrap();
        at += Duration::days(1);
    }
    assert_eq!(scheduler.get("d").unwrap().consecutive_failures, 2);
    assert_eq!(scheduler.get("d").unwrap().state, ScheduleState::Pending);

    scheduler.tick_at(at).await;
    scheduler
        .complete("d", &outcome(WorkflowStatus::PartialFailure))
        .await
        .unwrap();
    assert_eq!(scheduler.get("d").unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn history_is_bounded() {
    let scheduler = Scheduler::new(100);
    scheduler.register(daily("d")).await.unwrap();
    let mut at = scheduler.get("d").unwrap().next_run.unwrap();
    let mut last_id = String::new();
    for _ in 0..(HISTORY_LIMIT + 5) {
        scheduler.tick_at(at).await;
        let result = outcome(WorkflowStatus::Succeeded);
        last_id = result.workflow_id.clone();
        scheduler.complete("d", &result).await.unwrap();
        at += Duration::days(1);
    }
    let history = scheduler.get("d").unwrap().history;
    assert_eq!(history.len(), HISTORY_LIMIT);
    assert_eq!(history.last().unwrap().workflow_id, last_id);
}

#[tokio::test]
async fn register_validates_and_rejects_duplicates() {
    let scheduler = Scheduler::new(3);
    let bad = ScheduleEntry::new(
        "bad",
        Trigger::cron("0 0 9 * * *").unwrap(),
        WorkflowCriteria::new("o1"),
    );
    assert!(matches!(
        scheduler.register(bad).await,
        Err(ScheduleError::InvalidCriteria(_))
    ));

    scheduler.register(daily("d")).await.unwrap();
    assert!(matches!(
        scheduler.register(daily("d")).await,
        Err(ScheduleError::Duplicate(_))
    ));

    let generated = scheduler.register(daily("")).await.unwrap();
    assert!(!generated.is_empty());
    assert_eq!(scheduler.list().len(), 2);
}

#[tokio::test]
async fn cancel_removes_entry_and_row() {
    let db = Database::open_in_memory().unwrap();
    let scheduler = Scheduler::new(3).with_database(db.clone());
    scheduler.register(daily("d")).await.unwrap();

    assert!(scheduler.cancel("d").await.unwrap());
    assert!(scheduler.get("d").is_none());
    assert!(db.get_schedule("d").await.unwrap().is_none());
    assert!(!scheduler.cancel("d").await.unwrap());
}

#[tokio::test]
async fn completion_after_cancel_is_ignored() {
    let scheduler = Scheduler::new(3);
    scheduler.register(once_in_past("o")).await.unwrap();
    scheduler.tick_at(Utc::now()).await;
    scheduler.cancel("o").await.unwrap();
    scheduler
        .complete("o", &outcome(WorkflowStatus::Succeeded))
        .await
        .unwrap();
    assert!(scheduler.get("o").is_none());
}

#[tokio::test]
async fn persisted_entries_reload_and_sync() {
    let db = Database::open_in_memory().unwrap();
    let writer = Scheduler::new(3).with_database(db.clone());
    writer.register(daily("d1")).await.unwrap();

    let reader = Scheduler::new(3).with_database(db.clone());
    assert_eq!(reader.load_persisted().await.unwrap(), 1);
    let entry = reader.get("d1").unwrap();
    assert_eq!(entry.state, ScheduleState::Pending);
    assert_eq!(entry.criteria.search.title.as_deref(), Some("Rust Engineer"));
    assert_eq!(reader.load_persisted().await.unwrap(), 0);

    writer.register(daily("d2")).await.unwrap();
    writer.cancel("d1").await.unwrap();
    reader.sync_from_database().await.unwrap();
    let ids: Vec<_> = reader.list().into_iter().map(|e| e.schedule_id).collect();
    assert_eq!(ids, vec!["d2".to_string()]);
}

#[tokio::test]
async fn enable_reaches_entries_only_on_disk() {
    let db = Database::open_in_memory().unwrap();
    let writer = Scheduler::new(1).with_database(db.clone());
    writer.register(daily("d")).await.unwrap();
    let at = writer.get("d").unwrap().next_run.unwrap();
    writer.tick_at(at).await;
    writer
        .complete("d", &outcome(WorkflowStatus::Failed))
        .await
        .unwrap();
    assert_eq!(writer.get("d").unwrap().state, ScheduleState::Disabled);

    let cli = Scheduler::new(1).with_database(db.clone());
    assert!(cli.enable("d").await.unwrap());
    assert!(db.get_schedule("d").await.unwrap().unwrap().enabled);

    writer.sync_from_database().await.unwrap();
    assert_eq!(writer.get("d").unwrap().state, ScheduleState::Pending);
    assert!(!cli.enable("missing").await.unwrap());
}

struct CountingRunner {
    runs: AtomicUsize,
}

#[async_trait]
impl WorkflowRunner for CountingRunner {
    async fn run_workflow(&self, criteria: WorkflowCriteria, _cancel: CancellationToken) -> WorkflowResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut r = WorkflowResult::running(
            uuid::Uuid::new_v4().to_string(),
            criteria.owner_id.clone(),
            Utc::now(),
        );
        r.status = WorkflowStatus::Succeeded;
        r.finished_at = Some(Utc::now());
        r
    }
}

#[tokio::test]
async fn tick_dispatches_to_the_runner() {
    let runner = Arc::new(CountingRunner {
        runs: AtomicUsize::new(0),
    });
    let scheduler = Arc::new(Scheduler::new(3).with_runner(runner.clone()));
    scheduler.register(once_in_past("o")).await.unwrap();

    let fired = scheduler.tick().await;
    assert_eq!(fired.len(), 1);
    scheduler.shutdown().await;

    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    let entry = scheduler.get("o").unwrap();
    assert_eq!(entry.state, ScheduleState::Completed);
    assert_eq!(entry.history[0].status, WorkflowStatus::Succeeded);
}
