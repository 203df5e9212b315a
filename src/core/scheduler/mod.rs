//! Fires workflow runs on cron or one-shot triggers.
//!
//! A single periodic driver calls [`Scheduler::tick`]. Each tick claims every
//! due entry by moving it to `Firing`, advances and persists its next-run time,
//! and dispatches the run. The entry is not eligible again until
//! [`Scheduler::complete`] records the outcome, so one entry never has two
//! concurrent runs while different entries run side by side.

pub mod trigger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::persistence::Database;
use crate::core::persistence::types::{RunRecord, ScheduleRecord};
use crate::core::workflow::types::{WorkflowCriteria, WorkflowResult, WorkflowStatus};

pub use trigger::Trigger;

pub const HISTORY_LIMIT: usize = 20;

/// How long a completed one-shot stays resident after its run finished.
pub const COMPLETED_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Pending,
    Firing,
    Completed,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),
    #[error("schedule '{0}' already exists")]
    Duplicate(String),
    #[error("schedule persistence failed: {0}")]
    Persistence(String),
}

fn persistence(err: anyhow::Error) -> ScheduleError {
    ScheduleError::Persistence(format!("{:#}", err))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub schedule_id: String,
    pub owner_id: String,
    pub trigger: Trigger,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub state: ScheduleState,
    pub history: Vec<RunRecord>,
    pub criteria: WorkflowCriteria,
    /// Row deleted by another process while this entry was firing.
    retired: bool,
}

impl ScheduleEntry {
    pub fn new(schedule_id: impl Into<String>, trigger: Trigger, criteria: WorkflowCriteria) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            owner_id: criteria.owner_id.clone(),
            trigger,
            enabled: true,
            last_run: None,
            next_run: None,
            consecutive_failures: 0,
            state: ScheduleState::Pending,
            history: Vec::new(),
            criteria,
            retired: false,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.state == ScheduleState::Pending
            && self.next_run.is_some_and(|at| at <= now)
    }

    fn completion_expired(&self, now: DateTime<Utc>) -> bool {
        let finished = self.history.last().map(|r| r.finished_at).or(self.last_run);
        self.state == ScheduleState::Completed
            && finished.is_none_or(|at| at + chrono::Duration::seconds(COMPLETED_RETENTION_SECS) < now)
    }

    fn push_history(&mut self, record: RunRecord) {
        self.history.push(record);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    fn to_record(&self) -> ScheduleRecord {
        ScheduleRecord {
            schedule_id: self.schedule_id.clone(),
            owner_id: self.owner_id.clone(),
            trigger_kind: self.trigger.kind().to_string(),
            trigger_expr: self.trigger.expression(),
            enabled: self.enabled,
            last_run: self.last_run,
            next_run: self.next_run,
            consecutive_failures: self.consecutive_failures,
            history: self.history.clone(),
            criteria: self.criteria.clone(),
        }
    }

    fn from_record(record: ScheduleRecord) -> Result<Self, ScheduleError> {
        let trigger = Trigger::from_parts(&record.trigger_kind, &record.trigger_expr)?;
        Ok(Self {
            schedule_id: record.schedule_id,
            owner_id: record.owner_id,
            trigger,
            enabled: record.enabled,
            last_run: record.last_run,
            next_run: record.next_run,
            consecutive_failures: record.consecutive_failures,
            state: if record.enabled {
                ScheduleState::Pending
            } else {
                ScheduleState::Disabled
            },
            history: record.history,
            criteria: record.criteria,
            retired: false,
        })
    }
}

/// A claimed firing, handed to the runner.
#[derive(Debug, Clone)]
pub struct FiredRun {
    pub schedule_id: String,
    pub owner_id: String,
    pub criteria: WorkflowCriteria,
    pub fired_at: DateTime<Utc>,
}

/// Executes the workflow for a fired entry.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run_workflow(&self, criteria: WorkflowCriteria, cancel: CancellationToken) -> WorkflowResult;
}

pub struct Scheduler {
    entries: Mutex<BTreeMap<String, ScheduleEntry>>,
    db: Option<Database>,
    max_consecutive_failures: u32,
    runner: Option<Arc<dyn WorkflowRunner>>,
    in_flight: tokio::sync::Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            db: None,
            max_consecutive_failures: max_consecutive_failures.max(1),
            runner: None,
            in_flight: tokio::sync::Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn WorkflowRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ScheduleEntry>> {
        // Entries hold plain data; a poisoned lock still has a usable map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, record: &ScheduleRecord) -> Result<(), ScheduleError> {
        match &self.db {
            Some(db) => db.upsert_schedule(record).await.map_err(persistence),
            None => Ok(()),
        }
    }

    /// Write back an entry whose row must still exist; `false` when it is gone.
    async fn update(&self, record: &ScheduleRecord) -> Result<bool, ScheduleError> {
        match &self.db {
            Some(db) => db.update_schedule(record).await.map_err(persistence),
            None => Ok(true),
        }
    }

    async fn forget(&self, schedule_id: &str) -> Result<bool, ScheduleError> {
        match &self.db {
            Some(db) => db.delete_schedule(schedule_id).await.map_err(persistence),
            None => Ok(false),
        }
    }

    pub async fn register(&self, mut entry: ScheduleEntry) -> Result<String, ScheduleError> {
        entry
            .criteria
            .validate()
            .map_err(|e| ScheduleError::InvalidCriteria(e.message))?;
        entry.owner_id = entry.criteria.owner_id.clone();
        if entry.schedule_id.trim().is_empty() {
            entry.schedule_id = uuid::Uuid::new_v4().to_string();
        }
        if self.lock().contains_key(&entry.schedule_id) {
            return Err(ScheduleError::Duplicate(entry.schedule_id));
        }
        if let Some(db) = &self.db
            && db.get_schedule(&entry.schedule_id).await.map_err(persistence)?.is_some()
        {
            return Err(ScheduleError::Duplicate(entry.schedule_id));
        }

        if entry.next_run.is_none() {
            entry.next_run = entry.trigger.first_run(Utc::now());
        }
        if entry.next_run.is_none() {
            return Err(ScheduleError::InvalidTrigger(format!(
                "'{}' never fires",
                entry.trigger.expression()
            )));
        }

        self.persist(&entry.to_record()).await?;
        let id = entry.schedule_id.clone();
        info!(
            schedule_id = %id,
            owner_id = %entry.owner_id,
            trigger = %entry.trigger.expression(),
            "Schedule registered"
        );
        self.lock().insert(id.clone(), entry);
        Ok(id)
    }

    /// Remove an entry. A run already in flight finishes but is not recorded.
    pub async fn cancel(&self, schedule_id: &str) -> Result<bool, ScheduleError> {
        let removed = self.lock().remove(schedule_id).is_some();
        let deleted = self.forget(schedule_id).await?;
        if removed || deleted {
            info!(schedule_id, "Schedule cancelled");
        }
        Ok(removed || deleted)
    }

    /// Re-enable a disabled entry and reset its failure streak.
    pub async fn enable(&self, schedule_id: &str) -> Result<bool, ScheduleError> {
        let resident = self.lock().contains_key(schedule_id);
        if !resident
            && let Some(db) = &self.db
            && let Some(record) = db.get_schedule(schedule_id).await.map_err(persistence)?
        {
            let entry = ScheduleEntry::from_record(record)?;
            self.lock().entry(entry.schedule_id.clone()).or_insert(entry);
        }

        let record = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(schedule_id) else {
                return Ok(false);
            };
            if entry.state == ScheduleState::Completed {
                return Ok(false);
            }
            entry.enabled = true;
            entry.consecutive_failures = 0;
            if entry.state == ScheduleState::Disabled {
                entry.state = ScheduleState::Pending;
            }
            if entry.next_run.is_none() {
                entry.next_run = entry.trigger.first_run(Utc::now());
            }
            entry.to_record()
        };
        self.persist(&record).await?;
        info!(schedule_id, "Schedule enabled");
        Ok(true)
    }

    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, schedule_id: &str) -> Option<ScheduleEntry> {
        self.lock().get(schedule_id).cloned()
    }

    /// Claim every entry due at `now`. Claimed entries move to `Firing` and
    /// their next-run time is advanced and persisted before returning.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<FiredRun> {
        let mut fired = Vec::new();
        let mut records = Vec::new();
        {
            let mut entries = self.lock();
            entries.retain(|_, entry| !entry.completion_expired(now));
            for entry in entries.values_mut().filter(|e| e.is_due(now)) {
                entry.state = ScheduleState::Firing;
                entry.last_run = Some(now);
                entry.next_run = entry.trigger.next_after(now);
                records.push(entry.to_record());
                fired.push(FiredRun {
                    schedule_id: entry.schedule_id.clone(),
                    owner_id: entry.owner_id.clone(),
                    criteria: entry.criteria.clone(),
                    fired_at: now,
                });
            }
        }

        let mut gone = Vec::new();
        for record in &records {
            match self.update(record).await {
                Ok(true) => {}
                Ok(false) => gone.push(record.schedule_id.clone()),
                Err(e) => warn!(schedule_id = %record.schedule_id, "Failed to persist next run: {}", e),
            }
        }
        if !gone.is_empty() {
            let mut entries = self.lock();
            for id in &gone {
                entries.remove(id);
                info!(schedule_id = %id, "Schedule was cancelled elsewhere; not firing");
            }
            drop(entries);
            fired.retain(|run| !gone.contains(&run.schedule_id));
        }
        for run in &fired {
            info!(schedule_id = %run.schedule_id, owner_id = %run.owner_id, "Schedule fired");
        }
        fired
    }

    /// Tick at the current time and dispatch the claimed runs to the runner.
    pub async fn tick(self: &Arc<Self>) -> Vec<FiredRun> {
        let fired = self.tick_at(Utc::now()).await;
        if fired.is_empty() {
            return fired;
        }
        let Some(runner) = self.runner.clone() else {
            warn!("Scheduler has no runner attached; fired entries stay in Firing");
            return fired;
        };

        let mut in_flight = self.in_flight.lock().await;
        while in_flight.try_join_next().is_some() {}
        for run in &fired {
            let scheduler = self.clone();
            let runner = runner.clone();
            let run = run.clone();
            let cancel = self.shutdown.child_token();
            in_flight.spawn(async move {
                let result = runner.run_workflow(run.criteria, cancel).await;
                if let Err(e) = scheduler.complete(&run.schedule_id, &result).await {
                    error!(schedule_id = %run.schedule_id, "Failed to record scheduled run: {}", e);
                }
            });
        }
        fired
    }

    /// Record the outcome of a fired run and release the entry.
    pub async fn complete(
        &self,
        schedule_id: &str,
        result: &WorkflowResult,
    ) -> Result<(), ScheduleError> {
        let (record, one_shot) = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(schedule_id) else {
                // Cancelled while running.
                return Ok(());
            };
            if entry.retired {
                entries.remove(schedule_id);
                info!(schedule_id, "Dropped schedule cancelled during its run");
                return Ok(());
            }
            entry.push_history(RunRecord {
                workflow_id: result.workflow_id.clone(),
                status: result.status,
                finished_at: result.finished_at.unwrap_or_else(Utc::now),
            });

            match result.status {
                WorkflowStatus::Failed => entry.consecutive_failures += 1,
                WorkflowStatus::Cancelled | WorkflowStatus::Running => {}
                _ => entry.consecutive_failures = 0,
            }

            let one_shot = entry.trigger.is_one_shot();
            if one_shot {
                entry.state = ScheduleState::Completed;
                entry.next_run = None;
            } else if entry.consecutive_failures >= self.max_consecutive_failures {
                entry.enabled = false;
                entry.state = ScheduleState::Disabled;
                warn!(
                    schedule_id,
                    failures = entry.consecutive_failures,
                    "Schedule disabled after consecutive failures"
                );
            } else {
                entry.state = ScheduleState::Pending;
            }
            (entry.to_record(), one_shot)
        };

        if one_shot {
            self.forget(schedule_id).await?;
        } else if !self.update(&record).await? {
            self.lock().remove(schedule_id);
            info!(schedule_id, "Dropped schedule cancelled during its run");
        }
        Ok(())
    }

    /// Load every persisted entry, replacing nothing that is already resident.
    pub async fn load_persisted(&self) -> Result<usize, ScheduleError> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let records = db.list_schedules().await.map_err(persistence)?;
        let mut loaded = 0;
        let mut entries = self.lock();
        for record in records {
            let id = record.schedule_id.clone();
            match ScheduleEntry::from_record(record) {
                Ok(entry) => {
                    if !entries.contains_key(&id) {
                        entries.insert(id, entry);
                        loaded += 1;
                    }
                }
                Err(e) => warn!(schedule_id = %id, "Skipping unreadable schedule: {}", e),
            }
        }
        Ok(loaded)
    }

    /// Reconcile with rows written by other processes (for example the CLI):
    /// pick up new and re-enabled entries, drop idle entries whose row is gone.
    /// A firing entry without a row is retired and dropped when its run completes;
    /// completed one-shots stay until their retention runs out.
    pub async fn sync_from_database(&self) -> Result<(), ScheduleError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let records = db.list_schedules().await.map_err(persistence)?;
        let now = Utc::now();
        let mut entries = self.lock();

        let persisted: std::collections::HashSet<String> =
            records.iter().map(|r| r.schedule_id.clone()).collect();
        entries.retain(|id, entry| {
            if persisted.contains(id) {
                return true;
            }
            match entry.state {
                ScheduleState::Firing => {
                    entry.retired = true;
                    true
                }
                ScheduleState::Completed => !entry.completion_expired(now),
                ScheduleState::Pending | ScheduleState::Disabled => false,
            }
        });

        for record in records {
            let id = record.schedule_id.clone();
            match entries.get_mut(&id) {
                Some(entry) => {
                    if entry.state == ScheduleState::Disabled && record.enabled {
                        entry.enabled = true;
                        entry.state = ScheduleState::Pending;
                        entry.consecutive_failures = record.consecutive_failures;
                        entry.next_run = record.next_run;
                    }
                }
                None => match ScheduleEntry::from_record(record) {
                    Ok(entry) => {
                        info!(schedule_id = %id, "Picked up schedule from database");
                        entries.insert(id, entry);
                    }
                    Err(e) => warn!(schedule_id = %id, "Skipping unreadable schedule: {}", e),
                },
            }
        }
        Ok(())
    }

    /// Cancel in-flight runs and wait for them to record their outcome.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut in_flight = self.in_flight.lock().await;
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!("Scheduled run task failed: {}", e);
            }
        }
    }
}

/// Lifecycle adapter: loads persisted entries on init and drains runs on shutdown.
pub struct SchedulerComponent {
    scheduler: Arc<Scheduler>,
}

impl SchedulerComponent {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl LifecycleComponent for SchedulerComponent {
    async fn on_init(&mut self) -> anyhow::Result<()> {
        let loaded = self.scheduler.load_persisted().await?;
        info!("Loaded {} persisted schedule(s)", loaded);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
