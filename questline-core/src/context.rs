//! Context assembly for generation requests.
//!
//! Bounded on purpose: character snapshot, a capped lore excerpt and at most
//! `MAX_MEMORIES` retrieved records. Assembly never fails; without memory it
//! degrades to character and lore.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::character::{Character, CharacterId, Stat};
use crate::decision::Decision;
use crate::lore::LoreBook;
use crate::memory::{MemoryManager, MemoryTier};
use crate::store::Store;

/// Hard cap on memory records placed in a context.
pub const MAX_MEMORIES: usize = 10;

/// The character as the generator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub id: CharacterId,
    pub name: String,
    pub level: u32,
    pub stats: Vec<(Stat, u32)>,
    pub backstory: Option<String>,
}

impl From<&Character> for CharacterSnapshot {
    fn from(character: &Character) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
            level: character.level,
            stats: character.stats.iter().collect(),
            backstory: character.backstory.clone(),
        }
    }
}

/// A retrieved memory, flattened to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub tier: MemoryTier,
    pub text: String,
    pub score: f64,
}

/// Everything handed to the generator for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub character: CharacterSnapshot,
    pub lore_setting: String,
    pub lore_excerpt: String,
    pub memories: Vec<MemorySnippet>,
    pub world_flags: BTreeMap<String, String>,
    /// False when retrieval failed and the memory fields were dropped.
    pub memory_available: bool,
}

impl GenerationContext {
    /// A context with no memory; what assembly degrades to.
    pub fn without_memory(character: &Character, lore: &LoreBook, lore_chars: usize) -> Self {
        Self {
            character: CharacterSnapshot::from(character),
            lore_setting: lore.setting.clone(),
            lore_excerpt: lore.excerpt(lore_chars),
            memories: Vec::new(),
            world_flags: BTreeMap::new(),
            memory_available: false,
        }
    }

    /// Render as prompt text.
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "## Character");
        let _ = writeln!(out, "{} (level {})", self.character.name, self.character.level);
        let stats = self
            .character
            .stats
            .iter()
            .map(|(s, v)| format!("{s} {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "Stats: {stats}");
        if let Some(backstory) = &self.character.backstory {
            let _ = writeln!(out, "Backstory: {backstory}");
        }

        let _ = writeln!(out, "\n## Setting: {}", self.lore_setting);
        let _ = writeln!(out, "{}", self.lore_excerpt);

        if !self.world_flags.is_empty() {
            let _ = writeln!(out, "\n## World State");
            for (flag, value) in &self.world_flags {
                let _ = writeln!(out, "- {flag}: {value}");
            }
        }

        if !self.memories.is_empty() {
            let _ = writeln!(out, "\n## What Has Happened");
            for memory in &self.memories {
                let _ = writeln!(out, "- {}", memory.text);
            }
        }

        out
    }

    /// Rough token estimate (four characters per token).
    pub fn estimated_tokens(&self) -> usize {
        self.to_prompt().chars().count().div_ceil(4)
    }
}

/// Gathers character, lore and memory into a [`GenerationContext`].
pub struct ContextAssembler {
    memory: Arc<MemoryManager>,
    store: Arc<Store>,
    lore: Arc<LoreBook>,
    lore_chars: usize,
    memory_limit: usize,
}

impl ContextAssembler {
    pub fn new(
        memory: Arc<MemoryManager>,
        store: Arc<Store>,
        lore: Arc<LoreBook>,
        lore_chars: usize,
        memory_limit: usize,
    ) -> Self {
        Self {
            memory,
            store,
            lore,
            lore_chars,
            memory_limit: memory_limit.min(MAX_MEMORIES),
        }
    }

    pub fn lore(&self) -> &LoreBook {
        &self.lore
    }

    /// Assemble the context for `decision`. Never fails.
    pub async fn assemble(&self, character: &Character, decision: &Decision) -> GenerationContext {
        let query = retrieval_query(character, decision);

        let (memories, world_flags) = futures::join!(
            self.memory
                .retrieve_relevant(character.id, &query, self.memory_limit),
            self.store.world_flags()
        );

        let mut context = GenerationContext::without_memory(character, &self.lore, self.lore_chars);
        context.world_flags = world_flags;

        match memories {
            Ok(hits) => {
                context.memories = hits
                    .into_iter()
                    .take(self.memory_limit)
                    .map(|hit| MemorySnippet {
                        tier: hit.record.tier(),
                        text: hit.record.text(),
                        score: hit.score,
                    })
                    .collect();
                context.memory_available = true;
                debug!(
                    character_id = %character.id,
                    memories = context.memories.len(),
                    "context assembled"
                );
            }
            Err(e) => {
                warn!(
                    character_id = %character.id,
                    error = %e,
                    "memory retrieval failed, assembling without memory"
                );
            }
        }

        context
    }
}

fn retrieval_query(character: &Character, decision: &Decision) -> String {
    let mut query = format!("{} {}", decision.theme, decision.content_type.name());
    if let Some(stat) = decision.target_stat {
        query.push(' ');
        query.push_str(stat.name());
    }
    query.push(' ');
    query.push_str(&character.name);
    query
}
