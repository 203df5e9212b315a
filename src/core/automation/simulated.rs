use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{
    ActionOutput, AutomationBackend, AutomationError, BackendSession, BrowserAction,
    CapabilitySet, full_capabilities,
};

/// Backend that never touches a browser. It records every action and hands
/// back synthetic screenshot references, so it is always available as the
/// last tier and as the default when nothing else is configured.
#[derive(Default)]
pub struct SimulationBackend {
    journal: Arc<Mutex<Vec<BrowserAction>>>,
}

impl SimulationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action performed across all sessions, in order.
    pub fn performed(&self) -> Vec<BrowserAction> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AutomationBackend for SimulationBackend {
    fn kind(&self) -> &'static str {
        "simulation"
    }

    async fn init(&self) -> Result<Box<dyn BackendSession>, AutomationError> {
        Ok(Box::new(SimulationSession {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            journal: self.journal.clone(),
            screenshots: 0,
        }))
    }
}

struct SimulationSession {
    session_id: String,
    journal: Arc<Mutex<Vec<BrowserAction>>>,
    screenshots: usize,
}

#[async_trait]
impl BackendSession for SimulationSession {
    fn capabilities(&self) -> CapabilitySet {
        full_capabilities()
    }

    async fn perform(&mut self, action: &BrowserAction) -> Result<ActionOutput, AutomationError> {
        debug!(session = %self.session_id, ?action, "simulated browser action");
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(action.clone());
        }
        let artifact = match action {
            BrowserAction::Screenshot { label } => {
                self.screenshots += 1;
                Some(format!(
                    "sim://{}/{:02}-{}.png",
                    self.session_id, self.screenshots, label
                ))
            }
            _ => None,
        };
        Ok(ActionOutput { artifact })
    }

    async fn close(&mut self) {}
}
