use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ContentGenerator, GenerationRequest, GenerationTask};
use crate::core::error::register_secret;

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You assist a job seeker. Follow the requested output format exactly.";

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct LlmGenerator {
    base_url: String,
    model: String,
    api_key: String,
    client: Client,
}

impl LlmGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: String) -> Self {
        register_secret(&api_key);
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client: Client::new(),
        }
    }

    /// Build from the environment variable named in config.
    pub fn from_env(base_url: &str, model: &str, api_key_env: &str) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| anyhow!("environment variable {} is not set", api_key_env))?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("environment variable {} is empty", api_key_env));
        }
        Ok(Self::new(base_url, model, api_key))
    }

    fn temperature(task: GenerationTask) -> f32 {
        match task {
            GenerationTask::Discovery => 0.0,
            _ => 0.4,
        }
    }
}

#[async_trait]
impl ContentGenerator for LlmGenerator {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let prompt = request.prompt();
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: Self::temperature(request.task),
        };

        let res = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "LLM API error ({}): {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatResponse = res.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(anyhow!("LLM returned an empty completion"));
        }
        Ok(content)
    }
}
