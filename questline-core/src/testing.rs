//! Testing utilities.
//!
//! - `ScriptedProvider` replays queued replies and failures without network calls
//! - `ScriptedLorekeeper` replays queued lore scores
//! - `TestHarness` wires a full `QuestService` over an in-memory store
//! - Fixtures for characters and provider payloads

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::character::{Character, CharacterId, StatBlock};
use crate::config::{QuestlineConfig, Tier3Weights};
use crate::content::GeneratedContent;
use crate::error::{ConfigError, GenerationProviderError};
use crate::generation::{GenerationClient, GenerationProvider, GenerationRequest, ProviderReply};
use crate::lore::LoreBook;
use crate::memory::{KeywordRelevance, MemoryManager, Summarizer};
use crate::orchestrator::QuestService;
use crate::store::{NarrativeEvent, Store};
use crate::validation::{LoreScorer, LoreVerdict};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A provider that replays a script.
///
/// Replies are consumed in order; once the script runs out every call fails
/// with [`GenerationProviderError::Unavailable`].
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderReply, GenerationProviderError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.with_reply_usage(content, 100, 100)
    }

    /// Queue a successful reply with explicit token usage.
    pub fn with_reply_usage(
        self,
        content: impl Into<String>,
        input_tokens: usize,
        output_tokens: usize,
    ) -> Self {
        lock(&self.script).push_back(Ok(ProviderReply {
            content: content.into(),
            model: "scripted".to_string(),
            input_tokens,
            output_tokens,
        }));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: GenerationProviderError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Wait this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderReply, GenerationProviderError> {
        lock(&self.requests).push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(GenerationProviderError::Unavailable("script exhausted".into())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A Lorekeeper that replays queued scores, repeating the last one when the queue is empty.
pub struct ScriptedLorekeeper {
    scores: Mutex<VecDeque<u8>>,
    last: Mutex<u8>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLorekeeper {
    pub fn new(scores: impl IntoIterator<Item = u8>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
            last: Mutex::new(100),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter; stays valid after the lorekeeper moves into a pipeline.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl LoreScorer for ScriptedLorekeeper {
    async fn score(&self, _content: &GeneratedContent, _lore: &LoreBook) -> LoreVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.scores).pop_front() {
            *last = next;
        }
        LoreVerdict::new(*last, Vec::new(), Vec::new())
    }
}

/// A complete character whose STR trails the mean (13) by exactly 5.
pub fn sample_character() -> Character {
    Character::new("Mira", StatBlock::new([8, 14, 13, 12, 15, 16])).with_backstory(
        "A quarry worker's daughter from Emberfall who hopes to join the Wardens of the Lantern.",
    )
}

const OBJECTIVES: [&str; 6] = [
    "Haul twelve cut slabs to the mason's yard",
    "Brace the north ramp with timber props",
    "Drive the mule team past the washout",
    "Hoist the winch bucket from the deep pit",
    "Carry water casks up to the work crews",
    "Stack rubble into a wall near the gate",
];

/// A quest payload that passes tier-2 heuristics and the rule Lorekeeper.
///
/// `objectives` beyond six repeat the list.
pub fn quest_json(title: &str, objectives: usize, reward_stat: &str) -> String {
    let objectives: Vec<_> = (0..objectives)
        .map(|i| {
            json!({
                "description": OBJECTIVES[i % OBJECTIVES.len()],
                "reward_stat": reward_stat,
                "reward_xp": 50,
            })
        })
        .collect();
    json!({
        "title": title,
        "description": "The quarry master at Emberfall needs a capable hand. Loose blocks choke \
                        the lower path and idle carts wait beside the pit.",
        "objectives": objectives,
        "world_effects": [{"flag": "quarry_cleared", "value": "true"}],
    })
    .to_string()
}

/// A decision payload with every field the content type needs.
pub fn decision_json(content_type: &str, target_stat: Option<&str>) -> String {
    json!({
        "needs_content": true,
        "content_type": content_type,
        "theme": "quarry work",
        "difficulty": "medium",
        "target_stat": target_stat,
        "reasoning": "Strength trails the other stats.",
    })
    .to_string()
}

/// A provider decision that declines to generate anything.
pub fn no_content_json(reasoning: &str) -> String {
    json!({
        "needs_content": false,
        "reasoning": reasoning,
    })
    .to_string()
}

/// Configuration for harness runs: tier 3 reduces to the Lorekeeper score and
/// compression runs without pauses.
pub fn harness_config() -> QuestlineConfig {
    let mut config = QuestlineConfig::default();
    config.validation.tier3_weights = Tier3Weights::lore_only();
    config.memory.inter_character_delay = Duration::ZERO;
    config
}

/// A full `QuestService` over an in-memory store with scripted collaborators.
pub struct TestHarness {
    pub provider: Arc<ScriptedProvider>,
    pub lorekeeper_calls: Arc<AtomicUsize>,
    pub store: Arc<Store>,
    pub memory: Arc<MemoryManager>,
    pub service: QuestService,
    pub character: Character,
}

impl TestHarness {
    /// Harness with [`sample_character`] and [`harness_config`].
    pub async fn new(
        provider: ScriptedProvider,
        lore_scores: impl IntoIterator<Item = u8>,
    ) -> Result<Self, ConfigError> {
        Self::with_config(provider, lore_scores, sample_character(), harness_config()).await
    }

    pub async fn with_config(
        provider: ScriptedProvider,
        lore_scores: impl IntoIterator<Item = u8>,
        character: Character,
        config: QuestlineConfig,
    ) -> Result<Self, ConfigError> {
        let provider = Arc::new(provider);
        let lorekeeper = ScriptedLorekeeper::new(lore_scores);
        let lorekeeper_calls = lorekeeper.calls();

        let store = Arc::new(Store::new());
        store.upsert_character(character.clone()).await;

        let client = Arc::new(GenerationClient::new(
            provider.clone(),
            config.generation.clone(),
        ));
        let memory = Arc::new(MemoryManager::new(
            store.clone(),
            Summarizer::rules_only(config.memory.summary_word_cap),
            Arc::new(KeywordRelevance::default()),
            config.memory.clone(),
        ));
        let service = QuestService::new(
            store.clone(),
            client,
            memory.clone(),
            Arc::new(LoreBook::default()),
            Arc::new(lorekeeper),
            &config,
        )?;

        Ok(Self {
            provider,
            lorekeeper_calls,
            store,
            memory,
            service,
            character,
        })
    }

    pub fn character_id(&self) -> CharacterId {
        self.character.id
    }

    /// The character as currently stored.
    pub async fn stored_character(&self) -> Option<Character> {
        self.store.character(self.character.id).await
    }

    pub async fn events(&self) -> Vec<NarrativeEvent> {
        self.store.events_for(self.character.id).await
    }

    pub fn lorekeeper_call_count(&self) -> usize {
        self.lorekeeper_calls.load(Ordering::SeqCst)
    }
}
