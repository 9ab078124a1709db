//! Content generation: quests, completion consequences, deterministic fallbacks.

pub mod consequence;
pub mod creator;
pub mod quest;
mod templates;

pub use consequence::{parse_consequence, Consequence, ConsequenceEngine};
pub use creator::{QuestCreator, Revision};
pub use quest::{parse_quest, ContentMetadata, GeneratedContent, Objective, WorldEffect};

use crate::error::{GenerationProviderError, SchemaValidationError};
use thiserror::Error;

/// Why the content generator could not return content.
///
/// Never carries partial content; the caller decides whether to retry or fall back.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContentError {
    #[error("Generation failed: {0}")]
    Provider(#[from] GenerationProviderError),

    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaValidationError),

    #[error("Structural check failed: {}", .0.join("; "))]
    Structure(Vec<String>),

    #[error("Decision does not call for content")]
    NoContentRequested,
}
