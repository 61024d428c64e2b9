//! Model provider port - the opaque `complete(prompt, params)` capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::ExecutionParams;

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Network failures, rate limiting, overload
    Transient,
    /// Malformed request, authentication, unknown model
    Permanent,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub params: ExecutionParams,
}

/// Text plus token usage returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Completion {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// A language model backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable identifier recorded on cost entries (e.g. "anthropic").
    fn provider_id(&self) -> &str;

    /// Run one completion. Implementations must not retry internally.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}
