//! The generation path: provider boundary, caching client, payload parsing.

pub mod cache;
mod anthropic;
pub mod client;
pub mod provider;
pub mod schema;

pub use anthropic::ClaudeProvider;
pub use cache::{cache_key, ResponseCache};
pub use client::{GenerationClient, GenerationResponse, GenerationStats};
pub use provider::{ChatMessage, GenerationProvider, GenerationRequest, ProviderReply, Role};
pub use schema::{extract_json, parse_payload};
