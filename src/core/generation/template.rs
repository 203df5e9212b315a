use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{ContentGenerator, GenerationRequest, GenerationTask};

/// Deterministic generator used when no model is configured. Discovery finds
/// nothing; documents are assembled from the owner profile and the posting.
#[derive(Debug, Default, Clone)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

fn profile_field<'a>(context: &'a Value, field: &str) -> Option<&'a str> {
    context
        .get("owner_profile")
        .and_then(|p| p.get(field))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let ctx = &request.context;
        let owner = profile_field(ctx, "display_name").unwrap_or(request.owner_id.as_str());
        let (title, company) = request
            .candidate
            .as_ref()
            .map(|c| (c.title.as_str(), c.company.as_str()))
            .unwrap_or(("the role", "your company"));

        let text = match request.task {
            GenerationTask::Discovery => "[]".to_string(),
            GenerationTask::Resume => {
                let base = profile_field(ctx, "resume").unwrap_or("(no base resume on file)");
                format!("{}\nTarget role: {} at {}\n\n{}\n", owner, title, company, base)
            }
            GenerationTask::CoverLetter => format!(
                "Dear {} hiring team,\n\nI am applying for the {} position. My attached resume \
                 outlines the experience I would bring to {}.\n\nKind regards,\n{}\n",
                company, title, company, owner
            ),
            GenerationTask::NotificationSummary => {
                let status = ctx.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
                let submitted = ctx.get("submitted").and_then(|v| v.as_u64()).unwrap_or(0);
                let found = ctx.get("candidates").and_then(|v| v.as_u64()).unwrap_or(0);
                format!(
                    "Workflow finished with status {}: {} of {} applications submitted.",
                    status, submitted, found
                )
            }
        };
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generation::parse_candidates;
    use crate::core::workflow::types::Candidate;
    use serde_json::json;

    fn candidate() -> Candidate {
        Candidate {
            id: "c1".into(),
            title: "Platform Engineer".into(),
            company: "Acme".into(),
            location: None,
            url: "https://acme.example/jobs/1".into(),
            description: None,
            source: None,
        }
    }

    #[tokio::test]
    async fn discovery_finds_nothing() {
        let out = TemplateGenerator::new()
            .generate(&GenerationRequest::new(
                GenerationTask::Discovery,
                "o1",
                json!({}),
            ))
            .await
            .unwrap();
        assert!(parse_candidates(&out).unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_uses_profile() {
        let ctx = json!({"owner_profile": {"display_name": "Ada", "resume": "Rust, Go, SQL"}});
        let out = TemplateGenerator::new()
            .generate(&GenerationRequest::new(GenerationTask::Resume, "o1", ctx).for_candidate(&candidate()))
            .await
            .unwrap();
        assert!(out.starts_with("Ada"));
        assert!(out.contains("Platform Engineer at Acme"));
        assert!(out.contains("Rust, Go, SQL"));
    }

    #[tokio::test]
    async fn cover_letter_falls_back_to_owner_id() {
        let out = TemplateGenerator::new()
            .generate(
                &GenerationRequest::new(GenerationTask::CoverLetter, "owner-9", json!({}))
                    .for_candidate(&candidate()),
            )
            .await
            .unwrap();
        assert!(out.contains("Dear Acme hiring team"));
        assert!(out.trim_end().ends_with("owner-9"));
    }
}
