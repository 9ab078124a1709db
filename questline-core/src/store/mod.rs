//! Transactional in-process store.
//!
//! A [`Transaction`] works on a private copy of the state and swaps it in on
//! [`commit`](Transaction::commit). Dropping a transaction without committing
//! discards every write made through it. Transactions are serialized: the
//! store lock is held from `begin` until the transaction ends.

mod records;

pub use records::{
    NarrativeEvent, NarrativeEventKind, ObjectiveId, PersistedQuest, QuestBundle, QuestId,
    QuestObjective, QuestProgress, QuestStatus,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::character::{Character, CharacterId, Stat};
use crate::content::WorldEffect;
use crate::error::PersistenceError;
use crate::memory::{Episode, LongTermFact, WorkingEvent};

/// Points inside a transaction where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultPoint {
    InsertQuest,
    InsertObjectives,
    InsertProgress,
    InsertEvent,
    CompleteObjective,
    UpdateProgress,
    UpdateStatus,
    AwardReward,
    ApplyWorldEffect,
    AppendMemory,
    InsertEpisode,
    UpsertFact,
}

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    characters: BTreeMap<CharacterId, Character>,
    quests: BTreeMap<QuestId, PersistedQuest>,
    objectives: BTreeMap<QuestId, Vec<QuestObjective>>,
    progress: BTreeMap<QuestId, QuestProgress>,
    events: Vec<NarrativeEvent>,
    world_flags: BTreeMap<String, String>,
    working_events: Vec<WorkingEvent>,
    episodes: Vec<Episode>,
    facts: Vec<LongTermFact>,
}

impl StoreState {
    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    /// Case-insensitive lookup by name.
    pub fn character_by_name(&self, name: &str) -> Option<&Character> {
        self.characters
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn quest(&self, id: QuestId) -> Option<&PersistedQuest> {
        self.quests.get(&id)
    }

    pub fn quests_for(&self, character_id: CharacterId) -> impl Iterator<Item = &PersistedQuest> {
        self.quests
            .values()
            .filter(move |q| q.character_id == character_id)
    }

    pub fn quests(&self) -> impl Iterator<Item = &PersistedQuest> {
        self.quests.values()
    }

    /// Available and active quests for a character.
    pub fn open_quest_count(&self, character_id: CharacterId) -> usize {
        self.quests_for(character_id)
            .filter(|q| q.status.is_open())
            .count()
    }

    pub fn objectives(&self, quest_id: QuestId) -> &[QuestObjective] {
        self.objectives
            .get(&quest_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn objective(&self, id: ObjectiveId) -> Option<&QuestObjective> {
        self.objectives.values().flatten().find(|o| o.id == id)
    }

    pub fn progress(&self, quest_id: QuestId) -> Option<&QuestProgress> {
        self.progress.get(&quest_id)
    }

    pub fn bundle(&self, quest_id: QuestId) -> Option<QuestBundle> {
        let quest = self.quests.get(&quest_id)?.clone();
        let progress = self.progress.get(&quest_id)?.clone();
        Some(QuestBundle {
            quest,
            objectives: self.objectives(quest_id).to_vec(),
            progress,
        })
    }

    pub fn events_for(&self, character_id: CharacterId) -> impl Iterator<Item = &NarrativeEvent> {
        self.events
            .iter()
            .filter(move |e| e.character_id == character_id)
    }

    pub fn world_flags(&self) -> &BTreeMap<String, String> {
        &self.world_flags
    }

    /// Working events for a character in insertion order.
    pub fn working_events(&self, character_id: CharacterId) -> impl Iterator<Item = &WorkingEvent> {
        self.working_events
            .iter()
            .filter(move |e| e.character_id == character_id)
    }

    pub fn episodes(&self, character_id: CharacterId) -> impl Iterator<Item = &Episode> {
        self.episodes
            .iter()
            .filter(move |e| e.character_id == character_id)
    }

    pub fn facts(&self, character_id: CharacterId) -> impl Iterator<Item = &LongTermFact> {
        self.facts
            .iter()
            .filter(move |f| f.character_id == character_id)
    }

    /// Characters that have at least one working event.
    pub fn characters_with_events(&self) -> Vec<CharacterId> {
        let mut ids: Vec<CharacterId> = self.working_events.iter().map(|e| e.character_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Shared handle to the store.
#[derive(Debug, Default)]
pub struct Store {
    state: Mutex<StoreState>,
    faults: std::sync::Mutex<Vec<FaultPoint>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            faults: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start a transaction. Waits for any transaction in flight to finish.
    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.state.lock().await;
        let working = guard.clone();
        Transaction {
            store: self,
            guard,
            working,
            committed: false,
        }
    }

    /// Run a read-only closure against committed state.
    pub async fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// A copy of the committed state.
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    /// Make the next write at `point` fail. One-shot.
    pub fn inject_fault(&self, point: FaultPoint) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(point);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    pub async fn character(&self, id: CharacterId) -> Option<Character> {
        self.read(|s| s.character(id).cloned()).await
    }

    pub async fn quest(&self, id: QuestId) -> Option<PersistedQuest> {
        self.read(|s| s.quest(id).cloned()).await
    }

    pub async fn quest_bundle(&self, id: QuestId) -> Option<QuestBundle> {
        self.read(|s| s.bundle(id)).await
    }

    pub async fn open_quest_count(&self, character_id: CharacterId) -> usize {
        self.read(|s| s.open_quest_count(character_id)).await
    }

    pub async fn events_for(&self, character_id: CharacterId) -> Vec<NarrativeEvent> {
        self.read(|s| s.events_for(character_id).cloned().collect())
            .await
    }

    pub async fn world_flags(&self) -> BTreeMap<String, String> {
        self.read(|s| s.world_flags.clone()).await
    }

    /// Insert or replace a character outside any quest transaction.
    pub async fn upsert_character(&self, character: Character) {
        let mut guard = self.state.lock().await;
        guard.characters.insert(character.id, character);
    }

    /// Seed a world flag outside any quest transaction.
    pub async fn set_world_flag(&self, flag: impl Into<String>, value: impl Into<String>) {
        let mut guard = self.state.lock().await;
        guard.world_flags.insert(flag.into(), value.into());
    }

    fn take_fault(&self, point: FaultPoint) -> bool {
        match self.faults.lock() {
            Ok(mut faults) => match faults.iter().position(|p| *p == point) {
                Some(i) => {
                    faults.remove(i);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// A unit of work against the store.
pub struct Transaction<'a> {
    store: &'a Store,
    guard: MutexGuard<'a, StoreState>,
    working: StoreState,
    committed: bool,
}

impl Transaction<'_> {
    /// The transaction's view, including its own uncommitted writes.
    pub fn state(&self) -> &StoreState {
        &self.working
    }

    /// Publish every write made through this transaction.
    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.working);
        self.committed = true;
    }

    fn check(&self, point: FaultPoint) -> Result<(), PersistenceError> {
        if self.store.take_fault(point) {
            warn!(fault = ?point, "injected store fault");
            return Err(PersistenceError::Fault(point));
        }
        Ok(())
    }

    pub fn insert_quest(&mut self, quest: PersistedQuest) -> Result<(), PersistenceError> {
        self.check(FaultPoint::InsertQuest)?;
        if self.working.quests.contains_key(&quest.id) {
            return Err(PersistenceError::Conflict(format!(
                "quest {} already exists",
                quest.id
            )));
        }
        self.working.quests.insert(quest.id, quest);
        Ok(())
    }

    pub fn insert_objectives(
        &mut self,
        quest_id: QuestId,
        objectives: Vec<QuestObjective>,
    ) -> Result<(), PersistenceError> {
        self.check(FaultPoint::InsertObjectives)?;
        self.require_quest(quest_id)?;
        self.working.objectives.insert(quest_id, objectives);
        Ok(())
    }

    pub fn insert_progress(&mut self, progress: QuestProgress) -> Result<(), PersistenceError> {
        self.check(FaultPoint::InsertProgress)?;
        self.require_quest(progress.quest_id)?;
        self.working.progress.insert(progress.quest_id, progress);
        Ok(())
    }

    pub fn insert_event(&mut self, event: NarrativeEvent) -> Result<(), PersistenceError> {
        self.check(FaultPoint::InsertEvent)?;
        self.working.events.push(event);
        Ok(())
    }

    /// Quest row, objectives, zero progress and the offering event.
    pub fn insert_bundle(
        &mut self,
        bundle: QuestBundle,
        event: NarrativeEvent,
    ) -> Result<(), PersistenceError> {
        let quest_id = bundle.quest.id;
        self.insert_quest(bundle.quest)?;
        self.insert_objectives(quest_id, bundle.objectives)?;
        self.insert_progress(bundle.progress)?;
        self.insert_event(event)
    }

    /// Mark an objective done. Completing it twice is a conflict.
    pub fn complete_objective(
        &mut self,
        objective_id: ObjectiveId,
        at: DateTime<Utc>,
    ) -> Result<QuestObjective, PersistenceError> {
        self.check(FaultPoint::CompleteObjective)?;
        let objective = self
            .working
            .objectives
            .values_mut()
            .flatten()
            .find(|o| o.id == objective_id)
            .ok_or_else(|| PersistenceError::Missing(format!("objective {objective_id}")))?;
        if objective.completed {
            return Err(PersistenceError::Conflict(format!(
                "objective {objective_id} already completed"
            )));
        }
        objective.completed = true;
        objective.completed_at = Some(at);
        Ok(objective.clone())
    }

    /// Recompute progress from the objective rows.
    pub fn update_progress(&mut self, quest_id: QuestId) -> Result<QuestProgress, PersistenceError> {
        self.check(FaultPoint::UpdateProgress)?;
        self.require_quest(quest_id)?;
        let progress = QuestProgress::recompute(quest_id, self.working.objectives(quest_id));
        self.working.progress.insert(quest_id, progress.clone());
        Ok(progress)
    }

    /// Move a quest to `status`, stamping start/completion times.
    pub fn update_status(
        &mut self,
        quest_id: QuestId,
        status: QuestStatus,
        at: DateTime<Utc>,
    ) -> Result<PersistedQuest, PersistenceError> {
        self.check(FaultPoint::UpdateStatus)?;
        let quest = self
            .working
            .quests
            .get_mut(&quest_id)
            .ok_or_else(|| PersistenceError::Missing(format!("quest {quest_id}")))?;
        if !quest.status.can_transition_to(status) {
            return Err(PersistenceError::Conflict(format!(
                "quest {quest_id} cannot go from {} to {}",
                quest.status.name(),
                status.name()
            )));
        }
        quest.status = status;
        match status {
            QuestStatus::Active => quest.started_at = Some(at),
            QuestStatus::Completed => quest.completed_at = Some(at),
            _ => {}
        }
        Ok(quest.clone())
    }

    pub fn set_consequence(
        &mut self,
        quest_id: QuestId,
        narrative: impl Into<String>,
    ) -> Result<(), PersistenceError> {
        let quest = self
            .working
            .quests
            .get_mut(&quest_id)
            .ok_or_else(|| PersistenceError::Missing(format!("quest {quest_id}")))?;
        quest.consequence = Some(narrative.into());
        Ok(())
    }

    /// Award stat XP to a character. Returns stat points gained.
    pub fn award_reward(
        &mut self,
        character_id: CharacterId,
        stat: Stat,
        xp: u32,
    ) -> Result<u32, PersistenceError> {
        self.check(FaultPoint::AwardReward)?;
        let character = self
            .working
            .characters
            .get_mut(&character_id)
            .ok_or_else(|| PersistenceError::Missing(format!("character {character_id}")))?;
        Ok(character.award(stat, xp))
    }

    pub fn apply_world_effect(&mut self, effect: &WorldEffect) -> Result<(), PersistenceError> {
        self.check(FaultPoint::ApplyWorldEffect)?;
        self.working
            .world_flags
            .insert(effect.flag.clone(), effect.value.clone());
        Ok(())
    }

    pub fn append_working_event(&mut self, event: WorkingEvent) -> Result<(), PersistenceError> {
        self.check(FaultPoint::AppendMemory)?;
        self.working.working_events.push(event);
        Ok(())
    }

    /// Store an episode and mark its source events superseded by it.
    pub fn insert_episode(&mut self, episode: Episode) -> Result<(), PersistenceError> {
        self.check(FaultPoint::InsertEpisode)?;
        for event in self
            .working
            .working_events
            .iter_mut()
            .filter(|e| episode.source_event_ids.contains(&e.id))
        {
            if event.superseded_by.is_some() {
                return Err(PersistenceError::Conflict(format!(
                    "event {} already compressed",
                    event.id
                )));
            }
            event.superseded_by = Some(episode.id);
        }
        self.working.episodes.push(episode);
        Ok(())
    }

    /// Insert a fact, or update importance if the same fact is already known.
    pub fn upsert_fact(
        &mut self,
        character_id: CharacterId,
        fact: &str,
        importance: f64,
        at: DateTime<Utc>,
    ) -> Result<LongTermFact, PersistenceError> {
        self.check(FaultPoint::UpsertFact)?;
        let importance = importance.clamp(0.0, 1.0);
        let key = fact.trim();

        if let Some(existing) = self
            .working
            .facts
            .iter_mut()
            .find(|f| f.character_id == character_id && f.fact.eq_ignore_ascii_case(key))
        {
            existing.importance = importance;
            existing.updated_at = at;
            return Ok(existing.clone());
        }

        let created = LongTermFact::new(character_id, key, importance, at);
        self.working.facts.push(created.clone());
        Ok(created)
    }

    fn require_quest(&self, quest_id: QuestId) -> Result<(), PersistenceError> {
        if self.working.quests.contains_key(&quest_id) {
            Ok(())
        } else {
            Err(PersistenceError::Missing(format!("quest {quest_id}")))
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("transaction rolled back");
        }
    }
}
