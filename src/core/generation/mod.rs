//! Content generation collaborators: job discovery, resume tailoring, cover
//! letters and notification summaries. Prose quality is out of our hands; the
//! pipeline only depends on the narrow [`ContentGenerator`] interface.

pub mod llm;
pub mod template;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::workflow::types::Candidate;

pub use llm::LlmGenerator;
pub use template::TemplateGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    Discovery,
    Resume,
    CoverLetter,
    NotificationSummary,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task: GenerationTask,
    pub owner_id: String,
    pub candidate: Option<Candidate>,
    /// Task inputs: search parameters, owner profile, run summary.
    pub context: Value,
}

impl GenerationRequest {
    pub fn new(task: GenerationTask, owner_id: impl Into<String>, context: Value) -> Self {
        Self {
            task,
            owner_id: owner_id.into(),
            candidate: None,
            context,
        }
    }

    pub fn for_candidate(mut self, candidate: &Candidate) -> Self {
        self.candidate = Some(candidate.clone());
        self
    }

    /// Instruction text for model-backed generators.
    pub fn prompt(&self) -> String {
        let mut prompt = match self.task {
            GenerationTask::Discovery => String::from(
                "Find open job postings matching the search below. Reply with a JSON array \
                 of objects with fields title, company, location, url, description.\n",
            ),
            GenerationTask::Resume => String::from(
                "Rewrite the owner's base resume so it targets the job below. Reply with the \
                 resume text only.\n",
            ),
            GenerationTask::CoverLetter => String::from(
                "Write a short cover letter from the owner for the job below. Reply with the \
                 letter text only.\n",
            ),
            GenerationTask::NotificationSummary => String::from(
                "Summarize this job-application run for the owner in a few sentences.\n",
            ),
        };
        if let Some(candidate) = &self.candidate {
            prompt.push_str(&format!(
                "\nJob: {} at {}\nURL: {}\n",
                candidate.title, candidate.company, candidate.url
            ));
            if let Some(desc) = &candidate.description {
                prompt.push_str(&format!("Description: {}\n", desc));
            }
        }
        prompt.push_str(&format!("\nContext:\n{}", self.context));
        prompt
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Pull a JSON payload out of free-form model output. Accepts a fenced
/// ```json block, bare JSON, or JSON embedded after a line of prose.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let start = trimmed.find(['[', '{'])?;
    let close = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse discovery output into candidates. Accepts a bare array or an object
/// with a `candidates` / `jobs` array; entries without a URL are dropped.
pub fn parse_candidates(text: &str) -> Result<Vec<Candidate>> {
    let json = extract_json_block(text).ok_or_else(|| anyhow!("no JSON found in discovery output"))?;
    let value: Value = serde_json::from_str(json)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("candidates").or_else(|| map.remove("jobs")) {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("discovery output has no candidate list")),
        },
        _ => return Err(anyhow!("discovery output is not a list")),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Candidate>(item).ok())
        .filter(|c| !c.url.trim().is_empty())
        .map(Candidate::normalized)
        .collect())
}
