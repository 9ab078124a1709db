//! Quest generation with layered character memory.
//!
//! This crate provides:
//! - A decision, generation, validation and persistence pipeline for quests
//! - Three-tier validation with a pluggable Lorekeeper
//! - Working, episodic and long-term character memory with batch compression
//! - A transactional in-process store with JSON snapshots
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use questline_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QuestlineConfig::from_env()?;
//!     let store = Arc::new(Store::new());
//!     let client = Arc::new(GenerationClient::new(
//!         Arc::new(ClaudeProvider::from_env()?),
//!         config.generation.clone(),
//!     ));
//!     let memory = Arc::new(MemoryManager::new(
//!         store.clone(),
//!         Summarizer::new(client.clone(), config.memory.summary_word_cap),
//!         Arc::new(KeywordRelevance::default()),
//!         config.memory.clone(),
//!     ));
//!     let lore = Arc::new(LoreBook::default());
//!     let lorekeeper = Arc::new(ProviderLorekeeper::new(client.clone()));
//!     let service = QuestService::new(store, client, memory, lore, lorekeeper, &config)?;
//!
//!     let character = Character::new("Mira", StatBlock::new([8, 14, 13, 12, 15, 16]));
//!     service.store().upsert_character(character.clone()).await;
//!     if let GenerationOutcome::Stored(stored) = service.generate_for(character.id).await? {
//!         println!("{}", stored.bundle.quest.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod config;
pub mod content;
pub mod context;
pub mod decision;
pub mod error;
pub mod generation;
pub mod lore;
pub mod memory;
pub mod orchestrator;
pub mod persist;
pub mod store;
pub mod testing;
pub mod validation;

// Primary public API
pub use character::{Character, CharacterId, Stat, StatBlock};
pub use config::{
    DecisionConfig, GenerationConfig, MemoryConfig, QuestConfig, QuestlineConfig, Tier3Weights,
    ValidationConfig,
};
pub use content::{Consequence, ConsequenceEngine, ContentError, GeneratedContent, QuestCreator};
pub use context::{ContextAssembler, GenerationContext};
pub use decision::{ContentType, Decision, Difficulty, StoryCoordinator, Tone};
pub use error::{
    ConfigError, GenerationProviderError, MemoryCompressionError, PersistenceError, ReplyError,
    SchemaValidationError, ValidationFailure,
};
pub use generation::{ClaudeProvider, GenerationClient, GenerationProvider, GenerationRequest};
pub use lore::LoreBook;
pub use memory::{
    CompressionJob, CompressionReport, KeywordRelevance, MemoryManager, RelevanceIndex, Summarizer,
};
pub use orchestrator::{
    CompletionOutcome, GenerationOutcome, QuestError, QuestService, RetryThenFallback, StoredQuest,
};
pub use persist::StoreSnapshot;
pub use store::{PersistedQuest, QuestId, QuestStatus, Store};
pub use testing::{ScriptedLorekeeper, ScriptedProvider, TestHarness};
pub use validation::{
    LoreScorer, ProviderLorekeeper, RuleLorekeeper, Tier, ValidationPipeline, ValidationResult,
    Verdict,
};
