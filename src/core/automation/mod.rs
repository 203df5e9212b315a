//! Browser automation backends and the tiered fallback chain that drives them.
//!
//! A [`BackendTier`] couples a ranked [`AutomationBackend`] with its declared
//! capabilities and a health record shared across workflow runs. The
//! [`selector::BackendSelector`] walks tiers in rank order until one completes
//! the requested action list.

pub mod http;
pub mod mcp;
pub mod selector;
pub mod simulated;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use selector::{BackendSelector, SelectorError, SelectorSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Navigate,
    Type,
    Upload,
    Click,
    Screenshot,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Navigate,
        Capability::Type,
        Capability::Upload,
        Capability::Click,
        Capability::Screenshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Navigate => "navigate",
            Capability::Type => "type",
            Capability::Upload => "upload",
            Capability::Click => "click",
            Capability::Screenshot => "screenshot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

pub fn full_capabilities() -> CapabilitySet {
    Capability::ALL.into_iter().collect()
}

/// One step against the application page.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate { url: String },
    Type { selector: String, text: String },
    Upload { selector: String, path: String },
    Click { selector: String },
    Screenshot { label: String },
}

impl BrowserAction {
    pub fn capability(&self) -> Capability {
        match self {
            BrowserAction::Navigate { .. } => Capability::Navigate,
            BrowserAction::Type { .. } => Capability::Type,
            BrowserAction::Upload { .. } => Capability::Upload,
            BrowserAction::Click { .. } => Capability::Click,
            BrowserAction::Screenshot { .. } => Capability::Screenshot,
        }
    }

    /// Capabilities needed to run every action in the list.
    pub fn required(actions: &[BrowserAction]) -> CapabilitySet {
        actions.iter().map(BrowserAction::capability).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthRecord {
    pub state: HealthState,
    pub updated_at: Option<Instant>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            updated_at: None,
        }
    }
}

impl HealthRecord {
    /// A record older than `cooldown` reads as `Unknown` so the tier gets probed again.
    pub fn effective(&self, cooldown: Duration) -> HealthState {
        match self.updated_at {
            Some(at) if at.elapsed() <= cooldown => self.state,
            Some(_) => HealthState::Unknown,
            None => self.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("action rejected: {0}")]
    Rejected(String),
    #[error("unsupported action: {0}")]
    Unsupported(String),
}

impl AutomationError {
    /// Errors worth a single immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AutomationError::Transient(_) | AutomationError::Timeout(_))
    }

    /// Errors that mark the tier `Unavailable` rather than `Degraded`.
    pub fn is_unavailability(&self) -> bool {
        matches!(self, AutomationError::Unavailable(_))
    }
}

/// What a single action produced, if anything worth keeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub artifact: Option<String>,
}

#[async_trait]
pub trait AutomationBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Open a session. Failures here mark the tier unavailable.
    async fn init(&self) -> Result<Box<dyn BackendSession>, AutomationError>;
}

#[async_trait]
pub trait BackendSession: Send {
    /// Capabilities the live session reports; intersected with the tier's declaration.
    fn capabilities(&self) -> CapabilitySet;

    async fn perform(&mut self, action: &BrowserAction) -> Result<ActionOutput, AutomationError>;

    async fn close(&mut self);
}

/// A ranked automation backend. Clones share the same health record.
#[derive(Clone)]
pub struct BackendTier {
    pub rank: u32,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub backend: Arc<dyn AutomationBackend>,
    health: Arc<Mutex<HealthRecord>>,
}

impl std::fmt::Debug for BackendTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTier")
            .field("rank", &self.rank)
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl BackendTier {
    pub fn new(
        rank: u32,
        name: impl Into<String>,
        capabilities: CapabilitySet,
        backend: Arc<dyn AutomationBackend>,
    ) -> Self {
        Self {
            rank,
            name: name.into(),
            capabilities,
            backend,
            health: Arc::new(Mutex::new(HealthRecord::default())),
        }
    }

    pub fn health(&self, cooldown: Duration) -> HealthState {
        self.health
            .lock()
            .map(|h| h.effective(cooldown))
            .unwrap_or(HealthState::Unknown)
    }

    /// Raw state ignoring expiry.
    pub fn health_record(&self) -> HealthRecord {
        self.health.lock().map(|h| *h).unwrap_or_default()
    }

    pub fn mark(&self, state: HealthState) {
        if let Ok(mut h) = self.health.lock() {
            h.state = state;
            h.updated_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_parse_is_case_insensitive() {
        assert_eq!(Capability::parse(" Upload "), Some(Capability::Upload));
        assert_eq!(Capability::parse("scroll"), None);
    }

    #[test]
    fn required_capabilities_cover_action_list() {
        let actions = vec![
            BrowserAction::Navigate {
                url: "https://jobs.example.com".into(),
            },
            BrowserAction::Screenshot {
                label: "landing".into(),
            },
            BrowserAction::Navigate {
                url: "https://jobs.example.com/2".into(),
            },
        ];
        let required = BrowserAction::required(&actions);
        assert_eq!(required.len(), 2);
        assert!(required.contains(&Capability::Navigate));
        assert!(required.contains(&Capability::Screenshot));
    }

    #[test]
    fn health_expires_to_unknown() {
        let record = HealthRecord {
            state: HealthState::Unavailable,
            updated_at: Some(Instant::now() - Duration::from_secs(10)),
        };
        assert_eq!(record.effective(Duration::from_secs(60)), HealthState::Unavailable);
        assert_eq!(record.effective(Duration::from_secs(5)), HealthState::Unknown);
    }

    #[test]
    fn error_classes() {
        assert!(AutomationError::Timeout("x".into()).is_transient());
        assert!(AutomationError::Transient("x".into()).is_transient());
        assert!(!AutomationError::Rejected("x".into()).is_transient());
        assert!(AutomationError::Unavailable("x".into()).is_unavailability());
    }

    #[test]
    fn actions_serialize_with_tag() {
        let json = serde_json::to_value(BrowserAction::Click {
            selector: "#submit".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "click");
        assert_eq!(json["selector"], "#submit");
    }
}
