use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::automation::{Capability, CapabilitySet, SelectorSettings, full_capabilities};

pub const CONFIG_FILE: &str = "jobpilot.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub automation: AutomationSettings,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_resident")]
    pub max_resident: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationSettings {
    #[serde(default = "default_health_cooldown")]
    pub health_cooldown_secs: u64,

    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,

    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Http,
    Mcp,
    Simulation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub kind: TierKind,

    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the endpoint's API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Declared capabilities; all of them when omitted.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    #[default]
    Template,
    Llm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub kind: GenerationKind,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub kind: NotificationKind,

    #[serde(default)]
    pub url: Option<String>,
}

fn default_max_resident() -> usize {
    256
}
fn default_tick_interval() -> u64 {
    15
}
fn default_max_failures() -> u32 {
    3
}
fn default_health_cooldown() -> u64 {
    300
}
fn default_action_timeout() -> u64 {
    30
}
fn default_init_timeout() -> u64 {
    20
}
fn default_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_resident: default_max_resident(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            health_cooldown_secs: default_health_cooldown(),
            action_timeout_secs: default_action_timeout(),
            init_timeout_secs: default_init_timeout(),
            tiers: Vec::new(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            kind: GenerationKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl TierConfig {
    pub fn simulation() -> Self {
        Self {
            name: "simulation".to_string(),
            kind: TierKind::Simulation,
            endpoint: None,
            api_key_env: None,
            capabilities: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn capability_set(&self) -> Result<CapabilitySet> {
        let Some(names) = &self.capabilities else {
            return Ok(full_capabilities());
        };
        names
            .iter()
            .map(|name| {
                Capability::parse(name)
                    .ok_or_else(|| anyhow!("tier '{}': unknown capability '{}'", self.name, name))
            })
            .collect()
    }
}

impl AppConfig {
    /// Load `jobpilot.toml` from the data directory; a missing file yields defaults.
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config = Self::from_toml(&content)
            .map_err(|e| anyhow!("{}: {}", config_path.display(), e))?;
        info!(
            path = %config_path.display(),
            tiers = config.automation.tiers.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.max_resident == 0 {
            bail!("store.max_resident must be greater than zero");
        }
        if self.scheduler.tick_interval_secs == 0 {
            bail!("scheduler.tick_interval_secs must be greater than zero");
        }
        if self.scheduler.max_consecutive_failures == 0 {
            bail!("scheduler.max_consecutive_failures must be greater than zero");
        }
        for tier in &self.automation.tiers {
            match tier.kind {
                TierKind::Http if tier.endpoint.is_none() => {
                    bail!("tier '{}': http tiers need an endpoint", tier.name)
                }
                TierKind::Mcp if tier.command.is_none() => {
                    bail!("tier '{}': mcp tiers need a command", tier.name)
                }
                _ => {}
            }
            tier.capability_set()?;
        }
        if self.notification.kind == NotificationKind::Webhook && self.notification.url.is_none() {
            bail!("notification.url is required for webhook notifications");
        }
        Ok(())
    }

    /// Configured tiers in rank order, with the simulation tier as the last
    /// resort when none is configured.
    pub fn effective_tiers(&self) -> Vec<TierConfig> {
        let mut tiers = self.automation.tiers.clone();
        if !tiers.iter().any(|t| t.kind == TierKind::Simulation) {
            tiers.push(TierConfig::simulation());
        }
        tiers
    }

    pub fn selector_settings(&self) -> SelectorSettings {
        SelectorSettings {
            health_cooldown: Duration::from_secs(self.automation.health_cooldown_secs),
            action_timeout: Duration::from_secs(self.automation.action_timeout_secs),
            init_timeout: Duration::from_secs(self.automation.init_timeout_secs),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.store.max_resident, 256);
        assert_eq!(config.scheduler.tick_interval_secs, 15);
        assert_eq!(config.scheduler.max_consecutive_failures, 3);
        assert_eq!(config.automation.action_timeout_secs, 30);
        assert_eq!(config.generation.kind, GenerationKind::Template);
        assert_eq!(config.notification.kind, NotificationKind::Log);

        let tiers = config.effective_tiers();
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].kind, TierKind::Simulation);
    }

    #[test]
    fn simulation_tier_is_appended_last() {
        let content = r#"
[[automation.tiers]]
name = "remote-browser"
kind = "http"
endpoint = "http://127.0.0.1:9515"
capabilities = ["navigate", "type", "screenshot"]

[[automation.tiers]]
name = "playwright-mcp"
kind = "mcp"
command = "npx"
args = ["@playwright/mcp@latest", "--headless"]
"#;
        let config = AppConfig::from_toml(content).unwrap();
        let names: Vec<_> = config
            .effective_tiers()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["remote-browser", "playwright-mcp", "simulation"]);

        let declared = config.automation.tiers[0].capability_set().unwrap();
        assert_eq!(declared.len(), 3);
        assert!(!declared.contains(&Capability::Upload));
        assert_eq!(config.automation.tiers[1].capability_set().unwrap(), full_capabilities());
    }

    #[test]
    fn explicit_simulation_tier_is_not_duplicated() {
        let content = r#"
[[automation.tiers]]
name = "sim"
kind = "simulation"
"#;
        let config = AppConfig::from_toml(content).unwrap();
        assert_eq!(config.effective_tiers().len(), 1);
    }

    #[test]
    fn incomplete_sections_are_rejected() {
        let http = "[[automation.tiers]]\nname = \"h\"\nkind = \"http\"\n";
        assert!(AppConfig::from_toml(http).is_err());

        let caps = "[[automation.tiers]]\nname = \"s\"\nkind = \"simulation\"\ncapabilities = [\"teleport\"]\n";
        assert!(AppConfig::from_toml(caps).is_err());

        let webhook = "[notification]\nkind = \"webhook\"\n";
        assert!(AppConfig::from_toml(webhook).is_err());

        assert!(AppConfig::from_toml("[store]\nmax_resident = 0\n").is_err());
    }

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.store.max_resident, 256);

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[generation]\nkind = \"llm\"\nmodel = \"local-model\"\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.generation.kind, GenerationKind::Llm);
        assert_eq!(config.generation.model, "local-model");
        assert_eq!(config.generation.api_key_env, "OPENAI_API_KEY");
    }
}
