//! Anthropic Messages API adapter for the provider boundary.

use async_trait::async_trait;

use super::provider::{GenerationProvider, GenerationRequest, ProviderReply, Role};
use crate::error::GenerationProviderError;
use claude::{Claude, Message, Request};

/// [`GenerationProvider`] backed by the `claude` crate.
pub struct ClaudeProvider {
    client: Claude,
}

impl ClaudeProvider {
    pub fn new(client: Claude) -> Self {
        Self { client }
    }

    /// Build from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, GenerationProviderError> {
        Ok(Self::new(Claude::from_env()?))
    }
}

#[async_trait]
impl GenerationProvider for ClaudeProvider {
    async fn complete(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderReply, GenerationProviderError> {
        let messages = request
            .messages
            .iter()
            .map(|m| match m.role {
                Role::User => Message::user(m.text.clone()),
                Role::Assistant => Message::assistant(m.text.clone()),
            })
            .collect();

        let api_request = Request::new(messages)
            .with_model(request.model.clone())
            .with_max_tokens(request.max_tokens)
            .with_system(request.system_context.clone())
            .with_temperature(request.temperature);

        let response = self.client.complete(api_request).await?;

        Ok(ProviderReply {
            content: response.text,
            model: response.model,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
