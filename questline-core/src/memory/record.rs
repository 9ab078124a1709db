//! The three memory tiers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::{CharacterId, Stat};

/// What a working event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    QuestOffered,
    QuestStarted,
    ObjectiveCompleted,
    QuestCompleted,
    QuestAbandoned,
    QuestExpired,
    /// A real-world goal reported by the activity tracker.
    GoalCompleted,
    Encounter,
    Social,
    Milestone,
    Note,
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::QuestOffered => "quest_offered",
            EventType::QuestStarted => "quest_started",
            EventType::ObjectiveCompleted => "objective_completed",
            EventType::QuestCompleted => "quest_completed",
            EventType::QuestAbandoned => "quest_abandoned",
            EventType::QuestExpired => "quest_expired",
            EventType::GoalCompleted => "goal_completed",
            EventType::Encounter => "encounter",
            EventType::Social => "social",
            EventType::Milestone => "milestone",
            EventType::Note => "note",
        }
    }

    /// Events worth naming individually in a summary.
    pub fn is_key(&self) -> bool {
        matches!(
            self,
            EventType::QuestCompleted
                | EventType::ObjectiveCompleted
                | EventType::GoalCompleted
                | EventType::Milestone
        )
    }
}

/// Input for a new working event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub description: String,
    pub participants: Vec<String>,
    pub stat_changes: BTreeMap<Stat, i32>,
    /// Defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            participants: Vec::new(),
            stat_changes: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_participant(mut self, name: impl Into<String>) -> Self {
        self.participants.push(name.into());
        self
    }

    pub fn with_stat_change(mut self, stat: Stat, delta: i32) -> Self {
        *self.stat_changes.entry(stat).or_insert(0) += delta;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A raw, recent event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingEvent {
    pub id: Uuid,
    pub character_id: CharacterId,
    pub event_type: EventType,
    pub description: String,
    pub participants: Vec<String>,
    pub stat_changes: BTreeMap<Stat, i32>,
    pub timestamp: DateTime<Utc>,
    /// Set when an episode has folded this event in. Never deleted.
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
}

impl WorkingEvent {
    pub fn from_new(character_id: CharacterId, event: NewEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            character_id,
            event_type: event.event_type,
            description: event.description,
            participants: event.participants,
            stat_changes: event.stat_changes,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            superseded_by: None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// How an episode summary was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Provider,
    Rules,
}

/// A compressed batch of working events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub character_id: CharacterId,
    pub summary: String,
    pub key_events: Vec<String>,
    pub participants: Vec<String>,
    pub stat_change_totals: BTreeMap<Stat, i32>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub source_event_count: usize,
    pub source_event_ids: Vec<Uuid>,
    pub generated_by: SummarySource,
    pub created_at: DateTime<Utc>,
}

/// A durable fact that survives every compression cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermFact {
    pub id: Uuid,
    pub character_id: CharacterId,
    pub fact: String,
    /// 0.0 to 1.0.
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LongTermFact {
    pub fn new(
        character_id: CharacterId,
        fact: impl Into<String>,
        importance: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            character_id,
            fact: fact.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: at,
            updated_at: at,
        }
    }
}

/// Which tier a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    Episodic,
    LongTerm,
}

/// A record from any tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemoryRecord {
    Working(WorkingEvent),
    Episode(Episode),
    Fact(LongTermFact),
}

impl MemoryRecord {
    pub fn tier(&self) -> MemoryTier {
        match self {
            MemoryRecord::Working(_) => MemoryTier::Working,
            MemoryRecord::Episode(_) => MemoryTier::Episodic,
            MemoryRecord::Fact(_) => MemoryTier::LongTerm,
        }
    }

    /// Text used for retrieval and prompts.
    pub fn text(&self) -> String {
        match self {
            MemoryRecord::Working(e) => e.description.clone(),
            MemoryRecord::Episode(e) => e.summary.clone(),
            MemoryRecord::Fact(f) => f.fact.clone(),
        }
    }

    /// When the record was last relevant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MemoryRecord::Working(e) => e.timestamp,
            MemoryRecord::Episode(e) => e.period_end,
            MemoryRecord::Fact(f) => f.updated_at,
        }
    }
}

/// A record with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f64,
}
