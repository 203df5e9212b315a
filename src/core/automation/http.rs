use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    ActionOutput, AutomationBackend, AutomationError, BackendSession, BrowserAction, Capability,
    CapabilitySet, full_capabilities,
};

// ── Remote browser service wire types ──

#[derive(Deserialize)]
struct SessionCreated {
    session_id: String,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct ActionResponse {
    #[serde(default)]
    artifact: Option<String>,
}

/// Remote browser-automation service spoken to over HTTP/JSON.
///
/// `POST {endpoint}/sessions` opens a session, actions are posted to
/// `{endpoint}/sessions/{id}/actions` and `DELETE {endpoint}/sessions/{id}`
/// releases it.
pub struct HttpBrowserBackend {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpBrowserBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }
}

fn authorize(request: RequestBuilder, api_key: &Option<String>) -> RequestBuilder {
    match api_key {
        Some(key) => request.header("Authorization", format!("Bearer {}", key)),
        None => request,
    }
}

/// Map a non-success HTTP status onto the automation error classes.
pub fn classify_status(status: StatusCode, body: &str) -> AutomationError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status.as_u16() {
        408 | 425 | 429 | 504 => AutomationError::Transient(detail),
        401 | 403 | 502 | 503 => AutomationError::Unavailable(detail),
        s if s >= 500 => AutomationError::Transient(detail),
        _ => AutomationError::Rejected(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> AutomationError {
    if err.is_timeout() {
        AutomationError::Timeout(err.to_string())
    } else if err.is_connect() {
        AutomationError::Unavailable(err.to_string())
    } else {
        AutomationError::Transient(err.to_string())
    }
}

fn parse_capabilities(reported: Option<Vec<String>>) -> CapabilitySet {
    match reported {
        Some(names) => names.iter().filter_map(|n| Capability::parse(n)).collect(),
        None => full_capabilities(),
    }
}

#[async_trait]
impl AutomationBackend for HttpBrowserBackend {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn init(&self) -> Result<Box<dyn BackendSession>, AutomationError> {
        let url = format!("{}/sessions", self.endpoint);
        let request = authorize(self.client.post(&url), &self.api_key).json(&serde_json::json!({
            "capabilities": Capability::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        }));
        let res = request.send().await.map_err(classify_transport)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            // A session that cannot be opened means the tier is down, whatever the code.
            return Err(AutomationError::Unavailable(
                classify_status(status, &body).to_string(),
            ));
        }
        let created: SessionCreated = res
            .json()
            .await
            .map_err(|e| AutomationError::Unavailable(format!("malformed session reply: {}", e)))?;
        debug!(endpoint = %self.endpoint, session = %created.session_id, "Remote browser session opened");

        Ok(Box::new(HttpBrowserSession {
            base: format!("{}/sessions/{}", self.endpoint, created.session_id),
            capabilities: parse_capabilities(created.capabilities),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
        }))
    }
}

struct HttpBrowserSession {
    base: String,
    capabilities: CapabilitySet,
    api_key: Option<String>,
    client: Client,
}

#[async_trait]
impl BackendSession for HttpBrowserSession {
    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn perform(&mut self, action: &BrowserAction) -> Result<ActionOutput, AutomationError> {
        let url = format!("{}/actions", self.base);
        let res = authorize(self.client.post(&url), &self.api_key)
            .json(action)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let body = res.text().await.map_err(classify_transport)?;
        let parsed = if body.trim().is_empty() {
            ActionResponse::default()
        } else {
            serde_json::from_str::<ActionResponse>(&body)
                .map_err(|e| AutomationError::Rejected(format!("malformed action reply: {}", e)))?
        };
        Ok(ActionOutput {
            artifact: parsed.artifact,
        })
    }

    async fn close(&mut self) {
        let request = authorize(self.client.delete(&self.base), &self.api_key);
        if let Err(e) = request.send().await {
            warn!("Failed to release remote browser session {}: {}", self.base, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::GATEWAY_TIMEOUT, "").is_transient());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_unavailability());
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_unavailability());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "no such selector"),
            AutomationError::Rejected(msg) if msg.contains("no such selector")
        ));
    }

    #[test]
    fn reported_capabilities_default_to_full_set() {
        assert_eq!(parse_capabilities(None), full_capabilities());
        let caps = parse_capabilities(Some(vec!["navigate".into(), "teleport".into()]));
        assert_eq!(caps.len(), 1);
        assert!(caps.contains(&Capability::Navigate));
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Port 9 (discard) on localhost is essentially never listening.
        let backend = HttpBrowserBackend::new("http://127.0.0.1:9/", None);
        let err = match backend.init().await {
            Err(e) => e,
            Ok(_) => panic!("expected connection failure"),
        };
        assert!(err.is_unavailability() || err.is_transient());
    }
}
