//! Layered character memory.
//!
//! - Working memory: append-only recent events.
//! - Episodic memory: compressed batches of old working events.
//! - Long-term memory: promoted facts that never expire.
//!
//! Retrieval ranks across all three for context assembly.

pub mod batch;
pub mod manager;
pub mod record;
pub mod relevance;
pub mod summarizer;

pub use batch::{CharacterCompression, CompressionJob, CompressionOutcome, CompressionReport};
pub use manager::MemoryManager;
pub use record::{
    Episode, EventType, LongTermFact, MemoryRecord, MemoryTier, NewEvent, ScoredMemory,
    SummarySource, WorkingEvent,
};
pub use relevance::{KeywordRelevance, RelevanceIndex};
pub use summarizer::{rule_summary, EpisodeDraft, Summarizer};
