pub mod orchestrator;
pub mod stages;
pub mod types;

pub use orchestrator::{StageSet, WorkflowOrchestrator, compute_status};
pub use types::{
    AutomationConfig, Candidate, SearchParams, Stage, StageResult, StageTimeouts, WorkflowCriteria,
    WorkflowResult, WorkflowStatus,
};

#[cfg(test)]
mod tests;
