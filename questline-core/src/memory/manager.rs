//! The Memory Manager: sole owner of the working, episodic and long-term tiers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::record::{
    Episode, EventType, LongTermFact, MemoryRecord, NewEvent, ScoredMemory, WorkingEvent,
};
use super::relevance::RelevanceIndex;
use super::summarizer::Summarizer;
use crate::character::{CharacterId, Stat};
use crate::config::MemoryConfig;
use crate::error::{MemoryCompressionError, PersistenceError};
use crate::store::Store;

/// Owns all three memory tiers for every character.
pub struct MemoryManager {
    store: Arc<Store>,
    summarizer: Summarizer,
    relevance: Arc<dyn RelevanceIndex>,
    config: MemoryConfig,
    /// Characters with a compression in flight.
    compressing: DashSet<CharacterId>,
}

/// Releases the per-character compression slot on drop.
struct CompressionSlot<'a> {
    set: &'a DashSet<CharacterId>,
    character_id: CharacterId,
}

impl Drop for CompressionSlot<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.character_id);
    }
}

impl MemoryManager {
    pub fn new(
        store: Arc<Store>,
        summarizer: Summarizer,
        relevance: Arc<dyn RelevanceIndex>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            relevance,
            config,
            compressing: DashSet::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Append to a character's working memory.
    pub async fn append_event(
        &self,
        character_id: CharacterId,
        event: NewEvent,
    ) -> Result<WorkingEvent, PersistenceError> {
        let event = WorkingEvent::from_new(character_id, event);
        let mut tx = self.store.begin().await;
        tx.append_working_event(event.clone())?;
        tx.commit();
        debug!(
            character_id = %character_id,
            event_type = event.event_type.name(),
            "working event appended"
        );
        Ok(event)
    }

    /// Record a goal completion reported by the activity tracker.
    pub async fn record_goal_completion(
        &self,
        character_id: CharacterId,
        goal: &str,
        stat: Stat,
        delta: i32,
    ) -> Result<WorkingEvent, PersistenceError> {
        self.append_event(
            character_id,
            NewEvent::new(EventType::GoalCompleted, format!("Completed goal: {}", goal.trim()))
                .with_stat_change(stat, delta),
        )
        .await
    }

    /// The most recent `limit` working events, most recent first.
    pub async fn recent_events(&self, character_id: CharacterId, limit: usize) -> Vec<WorkingEvent> {
        let mut events: Vec<WorkingEvent> = self
            .store
            .read(|s| s.working_events(character_id).cloned().collect())
            .await;
        // Reverse first so equal timestamps keep latest-appended first under the stable sort.
        events.reverse();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    /// Uncompressed events older than the age cutoff, oldest first.
    pub async fn eligible_events(
        &self,
        character_id: CharacterId,
        now: DateTime<Utc>,
    ) -> Vec<WorkingEvent> {
        let cutoff = now - self.config.compression_age;
        let mut events: Vec<WorkingEvent> = self
            .store
            .read(|s| {
                s.working_events(character_id)
                    .filter(|e| !e.is_superseded() && e.timestamp < cutoff)
                    .cloned()
                    .collect()
            })
            .await;
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        events
    }

    /// Characters with at least one event eligible for compression.
    pub async fn eligible_characters(&self, now: DateTime<Utc>) -> Vec<CharacterId> {
        let cutoff = now - self.config.compression_age;
        self.store
            .read(|s| {
                s.characters_with_events()
                    .into_iter()
                    .filter(|id| {
                        s.working_events(*id)
                            .any(|e| !e.is_superseded() && e.timestamp < cutoff)
                    })
                    .collect()
            })
            .await
    }

    /// Fold the oldest eligible events into one episode.
    ///
    /// Returns `Ok(None)` without touching storage when fewer than the minimum
    /// batch size are eligible. At most one compression runs per character.
    pub async fn compress(
        &self,
        character_id: CharacterId,
        now: DateTime<Utc>,
    ) -> Result<Option<Episode>, MemoryCompressionError> {
        if !self.compressing.insert(character_id) {
            return Err(MemoryCompressionError::AlreadyRunning(character_id));
        }
        let _slot = CompressionSlot {
            set: &self.compressing,
            character_id,
        };

        let mut batch = self.eligible_events(character_id, now).await;
        if batch.is_empty() || batch.len() < self.config.min_batch_size {
            debug!(
                character_id = %character_id,
                eligible = batch.len(),
                min_batch = self.config.min_batch_size,
                "not enough events to compress"
            );
            return Ok(None);
        }
        batch.truncate(self.config.max_batch_size.max(self.config.min_batch_size));
        let (Some(period_start), Some(period_end)) =
            (batch.first().map(|e| e.timestamp), batch.last().map(|e| e.timestamp))
        else {
            return Ok(None);
        };

        let name = self
            .store
            .character(character_id)
            .await
            .map(|c| c.name)
            .unwrap_or_else(|| "The character".to_string());
        let draft = self.summarizer.summarize(&name, &batch).await;

        let episode = Episode {
            id: Uuid::new_v4(),
            character_id,
            summary: draft.summary,
            key_events: draft.key_events,
            participants: draft.participants,
            stat_change_totals: draft.stat_change_totals,
            period_start,
            period_end,
            source_event_count: batch.len(),
            source_event_ids: batch.iter().map(|e| e.id).collect(),
            generated_by: draft.generated_by,
            created_at: now,
        };

        let mut tx = self.store.begin().await;
        tx.insert_episode(episode.clone())?;
        tx.commit();

        info!(
            character_id = %character_id,
            episode_id = %episode.id,
            source_events = episode.source_event_count,
            generated_by = ?episode.generated_by,
            "working memory compressed"
        );
        Ok(Some(episode))
    }

    /// Promote a fact to long-term memory, or update its importance if already known.
    pub async fn promote_fact(
        &self,
        character_id: CharacterId,
        fact: &str,
        importance: f64,
    ) -> Result<LongTermFact, PersistenceError> {
        let mut tx = self.store.begin().await;
        let stored = tx.upsert_fact(character_id, fact, importance, Utc::now())?;
        tx.commit();
        Ok(stored)
    }

    /// Long-term facts, most important first.
    pub async fn facts(&self, character_id: CharacterId) -> Vec<LongTermFact> {
        let mut facts: Vec<LongTermFact> = self
            .store
            .read(|s| s.facts(character_id).cloned().collect())
            .await;
        facts.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        facts
    }

    pub async fn episodes(&self, character_id: CharacterId) -> Vec<Episode> {
        self.store
            .read(|s| s.episodes(character_id).cloned().collect())
            .await
    }

    /// Top-`k` records across all tiers for `query`.
    ///
    /// Superseded working events are left out; their episode stands in for them.
    pub async fn retrieve_relevant(
        &self,
        character_id: CharacterId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredMemory>, PersistenceError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let working_limit = self.config.working_candidates;
        let candidates: Vec<MemoryRecord> = self
            .store
            .read(|s| {
                let mut working: Vec<&WorkingEvent> = s
                    .working_events(character_id)
                    .filter(|e| !e.is_superseded())
                    .collect();
                working.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

                working
                    .into_iter()
                    .take(working_limit)
                    .cloned()
                    .map(MemoryRecord::Working)
                    .chain(s.episodes(character_id).cloned().map(MemoryRecord::Episode))
                    .chain(s.facts(character_id).cloned().map(MemoryRecord::Fact))
                    .collect()
            })
            .await;

        self.relevance.rank(query, candidates, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::generation::GenerationClient;
    use crate::memory::record::SummarySource;
    use crate::memory::relevance::KeywordRelevance;
    use crate::store::FaultPoint;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    fn manager(store: Arc<Store>) -> MemoryManager {
        MemoryManager::new(
            store,
            Summarizer::rules_only(250),
            Arc::new(KeywordRelevance::default()),
            MemoryConfig::default(),
        )
    }

    async fn seed_old_events(manager: &MemoryManager, id: CharacterId, n: usize) {
        let base = Utc::now() - chrono::Duration::days(30);
        for i in 0..n {
            manager
                .append_event(
                    id,
                    NewEvent::new(EventType::Encounter, format!("old event {i}"))
                        .at(base + chrono::Duration::minutes(i as i64)),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_recent_events_order_and_limit() {
        let store = Arc::new(Store::new());
        let manager = manager(store);
        let id = CharacterId::new();
        let base = Utc::now();
        for i in 0..5 {
            manager
                .append_event(
                    id,
                    NewEvent::new(EventType::Note, format!("note {i}"))
                        .at(base + chrono::Duration::seconds(i)),
                )
                .await
                .unwrap();
        }

        assert!(manager.recent_events(id, 0).await.is_empty());
        let two = manager.recent_events(id, 2).await;
        assert_eq!(
            two.iter().map(|e| e.description.as_str()).collect::<Vec<_>>(),
            vec!["note 4", "note 3"]
        );
        assert_eq!(manager.recent_events(id, 100).await.len(), 5);
    }

    #[tokio::test]
    async fn test_events_do_not_leak_between_characters() {
        let store = Arc::new(Store::new());
        let manager = manager(store);
        let a = CharacterId::new();
        let b = CharacterId::new();
        manager
            .append_event(a, NewEvent::new(EventType::Note, "a"))
            .await
            .unwrap();

        assert!(manager.recent_events(b, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_compress_respects_age_cutoff() {
        let store = Arc::new(Store::new());
        let manager = manager(store);
        let id = CharacterId::new();
        for i in 0..12 {
            manager
                .append_event(id, NewEvent::new(EventType::Note, format!("fresh {i}")))
                .await
                .unwrap();
        }

        assert!(manager.compress(id, Utc::now()).await.unwrap().is_none());
        assert!(manager.eligible_characters(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_never_becomes_an_episode() {
        let store = Arc::new(Store::new());
        let manager = MemoryManager::new(
            store.clone(),
            Summarizer::rules_only(250),
            Arc::new(KeywordRelevance::default()),
            MemoryConfig {
                min_batch_size: 0,
                ..MemoryConfig::default()
            },
        );
        let id = CharacterId::new();
        let before = store.snapshot().await;

        assert!(manager.compress(id, Utc::now()).await.unwrap().is_none());
        assert!(manager.episodes(id).await.is_empty());
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_compress_caps_batch_and_supersedes() {
        let store = Arc::new(Store::new());
        let manager = manager(store.clone());
        let id = CharacterId::new();
        seed_old_events(&manager, id, 60).await;

        let episode = manager.compress(id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(episode.source_event_count, 50);
        assert_eq!(episode.generated_by, SummarySource::Rules);
        assert!(episode.summary.split_whitespace().count() <= 250);

        // Nothing deleted; 50 superseded, 10 left eligible.
        let all = store.read(|s| s.working_events(id).count()).await;
        assert_eq!(all, 60);
        assert_eq!(manager.eligible_events(id, Utc::now()).await.len(), 10);

        // The remaining ten are exactly the minimum batch.
        let second = manager.compress(id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.source_event_count, 10);
        assert!(manager.compress(id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_episode_insert_leaves_events_uncompressed() {
        let store = Arc::new(Store::new());
        let manager = manager(store.clone());
        let id = CharacterId::new();
        seed_old_events(&manager, id, 10).await;

        store.inject_fault(FaultPoint::InsertEpisode);
        let err = manager.compress(id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, MemoryCompressionError::Persistence(_)));
        assert_eq!(manager.eligible_events(id, Utc::now()).await.len(), 10);
        assert!(manager.episodes(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_one_compression_per_character() {
        let store = Arc::new(Store::new());
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_reply("{\"summary\": \"A slow week.\", \"key_events\": []}")
                .with_delay(Duration::from_millis(50)),
        );
        let client = Arc::new(GenerationClient::new(provider, GenerationConfig::default()));
        let manager = MemoryManager::new(
            store,
            Summarizer::new(client, 250),
            Arc::new(KeywordRelevance::default()),
            MemoryConfig::default(),
        );
        let id = CharacterId::new();
        seed_old_events(&manager, id, 10).await;

        let (first, second) =
            tokio::join!(manager.compress(id, Utc::now()), manager.compress(id, Utc::now()));

        assert!(first.unwrap().is_some());
        assert!(matches!(
            second,
            Err(MemoryCompressionError::AlreadyRunning(_))
        ));
        // The slot is released afterwards.
        assert!(manager.compress(id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieval_spans_tiers_and_skips_superseded() {
        let store = Arc::new(Store::new());
        let manager = manager(store);
        let id = CharacterId::new();
        seed_old_events(&manager, id, 10).await;
        manager.compress(id, Utc::now()).await.unwrap();
        manager
            .append_event(id, NewEvent::new(EventType::Encounter, "Sparred at the yard"))
            .await
            .unwrap();
        manager
            .promote_fact(id, "Sworn to the Wardens of the Lantern", 0.9)
            .await
            .unwrap();

        let hits = manager.retrieve_relevant(id, "wardens yard", 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits
            .iter()
            .all(|h| !matches!(&h.record, MemoryRecord::Working(e) if e.is_superseded())));
        assert!(manager.retrieve_relevant(id, "x", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_goal_completion_records_stat_delta() {
        let store = Arc::new(Store::new());
        let manager = manager(store);
        let id = CharacterId::new();
        let event = manager
            .record_goal_completion(id, "10k steps", Stat::Constitution, 3)
            .await
            .unwrap();
        assert_eq!(event.event_type, EventType::GoalCompleted);
        assert_eq!(event.stat_changes.get(&Stat::Constitution), Some(&3));
    }
}
