mod scenarios;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::stages::{
    CoverLetterStage, DiscoveryStage, NotifyStage, ResumeStage, StageExecutor, SubmitStage,
};
use super::{Candidate, StageSet, WorkflowCriteria, WorkflowOrchestrator};
use crate::core::automation::simulated::SimulationBackend;
use crate::core::automation::{
    ActionOutput, AutomationBackend, AutomationError, BackendSelector, BackendSession,
    BackendTier, BrowserAction, CapabilitySet, SelectorSettings, full_capabilities,
};
use crate::core::generation::{ContentGenerator, GenerationRequest, GenerationTask, TemplateGenerator};
use crate::core::notify::{LogNotifier, NotificationChannel, NotificationSummary};
use crate::core::persistence::Database;
use crate::core::store::WorkflowStore;

pub(super) fn job(n: usize) -> Candidate {
    Candidate {
        id: String::new(),
        title: format!("Backend Engineer {}", n),
        company: format!("Company {}", n),
        location: Some("Remote".into()),
        url: format!("https://jobs.example.com/{}", n),
        description: None,
        source: None,
    }
}

pub(super) fn supplied(owner: &str, count: usize) -> WorkflowCriteria {
    WorkflowCriteria::new(owner).with_candidates((1..=count).map(job).collect())
}

/// Generator with switchable misbehaviour; everything else is templated.
#[derive(Default)]
pub(super) struct TestGenerator {
    pub discovery: Option<String>,
    pub stall_resume: bool,
    pub panic_cover_for: Option<String>,
}

#[async_trait]
impl ContentGenerator for TestGenerator {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        match request.task {
            GenerationTask::Discovery => {
                return Ok(self.discovery.clone().unwrap_or_else(|| "[]".into()));
            }
            GenerationTask::Resume if self.stall_resume => {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            GenerationTask::CoverLetter => {
                if let (Some(company), Some(c)) = (&self.panic_cover_for, &request.candidate)
                    && &c.company == company
                {
                    panic!("cover letter template blew up");
                }
            }
            _ => {}
        }
        TemplateGenerator::new().generate(request).await
    }
}

/// Backend whose sessions reject navigation to URLs containing a marker.
pub(super) struct RejectingBackend {
    pub marker: String,
}

struct RejectingSession {
    marker: String,
}

#[async_trait]
impl AutomationBackend for RejectingBackend {
    fn kind(&self) -> &'static str {
        "rejecting"
    }

    async fn init(&self) -> Result<Box<dyn BackendSession>, AutomationError> {
        Ok(Box::new(RejectingSession {
            marker: self.marker.clone(),
        }))
    }
}

#[async_trait]
impl BackendSession for RejectingSession {
    fn capabilities(&self) -> CapabilitySet {
        full_capabilities()
    }

    async fn perform(&mut self, action: &BrowserAction) -> Result<ActionOutput, AutomationError> {
        if let BrowserAction::Navigate { url } = action
            && url.contains(&self.marker)
        {
            return Err(AutomationError::Rejected(format!("form at {} refused", url)));
        }
        Ok(ActionOutput { artifact: None })
    }

    async fn close(&mut self) {}
}

pub(super) struct FailingChannel;

#[async_trait]
impl NotificationChannel for FailingChannel {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _owner_id: &str, _summary: &NotificationSummary) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

pub(super) struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub db: Database,
    pub simulation: Arc<SimulationBackend>,
    _artifacts: TempDir,
}

pub(super) struct HarnessBuilder {
    generator: Arc<dyn ContentGenerator>,
    channel: Arc<dyn NotificationChannel>,
    tiers: Option<Vec<BackendTier>>,
    discovery: Option<Arc<dyn StageExecutor>>,
    store: Option<WorkflowStore>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            generator: Arc::new(TemplateGenerator::new()),
            channel: Arc::new(LogNotifier),
            tiers: None,
            discovery: None,
            store: None,
        }
    }

    pub fn generator(mut self, generator: impl ContentGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn channel(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channel = Arc::new(channel);
        self
    }

    pub fn tiers(mut self, tiers: Vec<BackendTier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn discovery(mut self, stage: impl StageExecutor + 'static) -> Self {
        self.discovery = Some(Arc::new(stage));
        self
    }

    pub fn store(mut self, store: WorkflowStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let simulation = Arc::new(SimulationBackend::new());
        let tiers = self.tiers.unwrap_or_else(|| {
            vec![BackendTier::new(
                1,
                "simulation",
                full_capabilities(),
                simulation.clone(),
            )]
        });
        let owners = Arc::new(db.clone());
        let settings = SelectorSettings {
            action_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(5),
            ..SelectorSettings::default()
        };

        let stages = StageSet {
            discovery: self.discovery.unwrap_or_else(|| {
                Arc::new(DiscoveryStage::new(self.generator.clone(), owners.clone()))
            }),
            resume: Arc::new(ResumeStage::new(self.generator.clone())),
            cover_letter: Arc::new(CoverLetterStage::new(self.generator.clone())),
            submit: Arc::new(SubmitStage::new(
                BackendSelector::new(settings),
                Arc::new(tiers),
                owners,
                artifacts.path().to_path_buf(),
            )),
            notify: Arc::new(NotifyStage::new(self.generator.clone(), self.channel)),
        };
        let store = self
            .store
            .unwrap_or_else(|| WorkflowStore::new(64).with_archive(Arc::new(db.clone())));

        Harness {
            orchestrator: WorkflowOrchestrator::new(stages, Arc::new(store)),
            db,
            simulation,
            _artifacts: artifacts,
        }
    }
}

pub(super) fn rejecting_tier(rank: u32, marker: &str) -> BackendTier {
    BackendTier::new(
        rank,
        format!("rejecting-{}", rank),
        full_capabilities(),
        Arc::new(RejectingBackend {
            marker: marker.to_string(),
        }),
    )
}
