//! Language-model plumbing for campaign copy and reply drafts.
//!
//! `create_provider` turns an `LlmConfig` into an `Arc<dyn LlmProvider>`
//! backed by a rig-core client. The rest of the crate only sees the trait.

mod costs;
pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::fmt;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Hosted model families the mailer can write with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Anthropic,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "openai",
            LlmBackend::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend, credentials and model for the content generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Supplied through the environment; never logged.
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Build the provider described by `config`. No network traffic happens
/// until the first completion.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let key = config.api_key.expose_secret();
    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::OpenAi => {
            use rig::providers::openai;
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(
                client.completion_model(&config.model),
                &config.model,
            ))
        }
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(
                client.completion_model(&config.model),
                &config.model,
            ))
        }
    };

    tracing::info!(backend = %config.backend, model = %config.model, "LLM provider ready");
    Ok(provider)
}

fn client_error(backend: LlmBackend, err: impl fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: backend.to_string(),
        reason: format!("client construction failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: LlmBackend, model: &str) -> LlmConfig {
        LlmConfig {
            backend,
            api_key: secrecy::SecretString::from("test-key"),
            model: model.to_string(),
        }
    }

    #[test]
    fn openai_provider_builds_offline() {
        let provider = create_provider(&config(LlmBackend::OpenAi, "gpt-4o-mini")).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn anthropic_provider_is_priced() {
        let provider =
            create_provider(&config(LlmBackend::Anthropic, "claude-3-5-haiku-latest")).unwrap();
        assert_eq!(provider.model_name(), "claude-3-5-haiku-latest");
        assert!(provider.cost_per_token().0 > rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn backend_names() {
        assert_eq!(LlmBackend::OpenAi.to_string(), "openai");
        assert_eq!(LlmBackend::Anthropic.as_str(), "anthropic");
    }
}
