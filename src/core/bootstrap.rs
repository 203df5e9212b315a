//! Wires configuration into a ready-to-run object graph.

use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::core::automation::http::HttpBrowserBackend;
use crate::core::automation::mcp::McpBrowserBackend;
use crate::core::automation::simulated::SimulationBackend;
use crate::core::automation::{AutomationBackend, BackendSelector, BackendTier};
use crate::core::config::{
    AppConfig, GenerationConfig, GenerationKind, NotificationConfig, NotificationKind, TierConfig,
    TierKind,
};
use crate::core::error::register_secret;
use crate::core::generation::{ContentGenerator, LlmGenerator, TemplateGenerator};
use crate::core::notify::{LogNotifier, NotificationChannel, WebhookNotifier};
use crate::core::persistence::Database;
use crate::core::scheduler::Scheduler;
use crate::core::store::WorkflowStore;
use crate::core::workflow::stages::{
    CoverLetterStage, DiscoveryStage, NotifyStage, ResumeStage, SubmitStage,
};
use crate::core::workflow::{StageSet, WorkflowOrchestrator};

pub const DATABASE_FILE: &str = "jobpilot.db";

pub struct Runtime {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub db: Database,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Load `jobpilot.toml` from `data_dir` and build everything from it.
    pub async fn boot(data_dir: &Path) -> Result<Self> {
        let config = AppConfig::load(data_dir).await?;
        Self::with_config(config, data_dir).await
    }

    pub async fn with_config(config: AppConfig, data_dir: &Path) -> Result<Self> {
        let db = Database::open(data_dir.join(DATABASE_FILE)).await?;
        let tiers = build_tiers(&config.effective_tiers())?;
        let generator = build_generator(&config.generation)?;
        let notifier = build_notifier(&config.notification)?;
        let owners = Arc::new(db.clone());

        let stages = StageSet {
            discovery: Arc::new(DiscoveryStage::new(generator.clone(), owners.clone())),
            resume: Arc::new(ResumeStage::new(generator.clone())),
            cover_letter: Arc::new(CoverLetterStage::new(generator.clone())),
            submit: Arc::new(SubmitStage::new(
                BackendSelector::new(config.selector_settings()),
                Arc::new(tiers),
                owners,
                data_dir.join("artifacts"),
            )),
            notify: Arc::new(NotifyStage::new(generator, notifier)),
        };
        let store = WorkflowStore::new(config.store.max_resident).with_archive(Arc::new(db.clone()));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(stages, Arc::new(store)));
        let scheduler = Arc::new(
            Scheduler::new(config.scheduler.max_consecutive_failures)
                .with_database(db.clone())
                .with_runner(orchestrator.clone()),
        );

        info!(
            data_dir = %data_dir.display(),
            generator = ?config.generation.kind,
            notifier = ?config.notification.kind,
            "Runtime ready"
        );
        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            db,
            orchestrator,
            scheduler,
        })
    }
}

fn api_key_from_env(name: Option<&str>) -> Option<String> {
    let key = std::env::var(name?).ok().filter(|k| !k.trim().is_empty())?;
    register_secret(&key);
    Some(key)
}

/// Tiers ranked by their position in the configuration, starting at 1.
pub fn build_tiers(configs: &[TierConfig]) -> Result<Vec<BackendTier>> {
    configs
        .iter()
        .enumerate()
        .map(|(i, tier)| {
            let backend: Arc<dyn AutomationBackend> = match tier.kind {
                TierKind::Http => {
                    let endpoint = tier
                        .endpoint
                        .clone()
                        .ok_or_else(|| anyhow!("tier '{}' has no endpoint", tier.name))?;
                    Arc::new(HttpBrowserBackend::new(
                        endpoint,
                        api_key_from_env(tier.api_key_env.as_deref()),
                    ))
                }
                TierKind::Mcp => {
                    let command = tier
                        .command
                        .clone()
                        .ok_or_else(|| anyhow!("tier '{}' has no command", tier.name))?;
                    Arc::new(McpBrowserBackend::new(
                        tier.name.clone(),
                        command,
                        tier.args.clone(),
                        tier.env.clone(),
                    ))
                }
                TierKind::Simulation => Arc::new(SimulationBackend::new()),
            };
            Ok(BackendTier::new(
                (i + 1) as u32,
                tier.name.clone(),
                tier.capability_set()?,
                backend,
            ))
        })
        .collect()
}

pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn ContentGenerator>> {
    let generator: Arc<dyn ContentGenerator> = match config.kind {
        GenerationKind::Template => Arc::new(TemplateGenerator::new()),
        GenerationKind::Llm => Arc::new(LlmGenerator::from_env(
            &config.base_url,
            &config.model,
            &config.api_key_env,
        )?),
    };
    Ok(generator)
}

pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn NotificationChannel>> {
    let notifier: Arc<dyn NotificationChannel> = match config.kind {
        NotificationKind::Log => Arc::new(LogNotifier),
        NotificationKind::Webhook => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow!("webhook notifications need a url"))?;
            Arc::new(WebhookNotifier::new(url))
        }
    };
    Ok(notifier)
}
