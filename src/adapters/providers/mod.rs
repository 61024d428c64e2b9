//! Model provider adapters.

pub mod anthropic;
pub mod scripted;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use scripted::{ScriptedProvider, ScriptedResponse};

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ProviderConfig, ProviderKind};
use crate::domain::ports::ModelProvider;

/// Build the provider selected by configuration.
pub fn build_provider(config: &ProviderConfig) -> DomainResult<Arc<dyn ModelProvider>> {
    Ok(match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(AnthropicConfig::from(config))?),
        ProviderKind::Scripted => Arc::new(ScriptedProvider::offline()),
    })
}
