//! The provider boundary: what the core sends and what it expects back.

use crate::error::GenerationProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A request to the generative provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_context: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, system_context: impl Into<String>) -> Self {
        Self {
            system_context: system_context.into(),
            messages: Vec::new(),
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// What a provider returns for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    /// Raw text; expected to hold a JSON payload.
    pub content: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// An external generative content provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Perform exactly one generation call.
    async fn complete(&self, request: &GenerationRequest)
        -> Result<ProviderReply, GenerationProviderError>;

    /// Provider name for logs and metadata.
    fn name(&self) -> &str;
}
