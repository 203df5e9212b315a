//! Error taxonomy shared by stages, the backend selector and the store.
//!
//! Every message that can end up in a `StageResult` goes through [`redact`]
//! first, so API keys and bearer tokens never reach persisted results or logs
//! derived from them.

use regex::Regex;
use std::sync::{LazyLock, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    Timeout,
    BackendUnavailable,
    AllBackendsExhausted,
    ContentGenerationError,
    InfrastructureError,
    Skipped,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::AllBackendsExhausted => "all_backends_exhausted",
            ErrorKind::ContentGenerationError => "content_generation_error",
            ErrorKind::InfrastructureError => "infrastructure_error",
            ErrorKind::Skipped => "skipped",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded against a single stage execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    /// Build an error with a redacted message.
    pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: redact(message.as_ref()),
        }
    }

    pub fn validation(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn timeout(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn generation(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::ContentGenerationError, format!("{:#}", err))
    }

    pub fn infrastructure(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::InfrastructureError, message)
    }

    pub fn internal(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

const REDACTED: &str = "[redacted]";

static SECRETS: LazyLock<RwLock<Vec<String>>> = LazyLock::new(|| RwLock::new(Vec::new()));

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)bearer\s+[a-z0-9._\-]+",
        r"\bsk-[A-Za-z0-9_\-]{8,}",
        r#"(?i)\b(api[_-]?key|token|secret|password)\s*[=:]\s*["']?[^\s"'&,]+"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Remember a secret value so it is masked wherever it appears in an error.
/// Values shorter than four characters are ignored to avoid masking noise.
pub fn register_secret(value: &str) {
    let value = value.trim();
    if value.len() < 4 {
        return;
    }
    if let Ok(mut secrets) = SECRETS.write()
        && !secrets.iter().any(|s| s == value)
    {
        secrets.push(value.to_string());
    }
}

/// Mask registered secrets and common credential shapes.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    if let Ok(secrets) = SECRETS.read() {
        for secret in secrets.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), REDACTED);
            }
        }
    }
    for re in TOKEN_PATTERNS.iter() {
        out = re.replace_all(&out, REDACTED).into_owned();
    }
    out
}
