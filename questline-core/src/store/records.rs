//! Persisted quest rows and narrative events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::{CharacterId, Stat};
use crate::content::{ContentMetadata, GeneratedContent, Objective, WorldEffect};
use crate::decision::{ContentType, Difficulty};

/// Unique identifier for a persisted quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestId(Uuid);

impl QuestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QuestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a quest objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectiveId(Uuid);

impl ObjectiveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectiveId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a persisted quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Available,
    Active,
    Completed,
    Abandoned,
    Expired,
}

impl QuestStatus {
    pub fn name(&self) -> &'static str {
        match self {
            QuestStatus::Available => "available",
            QuestStatus::Active => "active",
            QuestStatus::Completed => "completed",
            QuestStatus::Abandoned => "abandoned",
            QuestStatus::Expired => "expired",
        }
    }

    /// Whether the quest still counts toward the active ceiling.
    pub fn is_open(&self) -> bool {
        matches!(self, QuestStatus::Available | QuestStatus::Active)
    }

    pub fn can_transition_to(&self, next: QuestStatus) -> bool {
        matches!(
            (self, next),
            (QuestStatus::Available, QuestStatus::Active)
                | (QuestStatus::Available, QuestStatus::Abandoned)
                | (QuestStatus::Available, QuestStatus::Expired)
                | (QuestStatus::Active, QuestStatus::Completed)
                | (QuestStatus::Active, QuestStatus::Abandoned)
        )
    }
}

/// The quest row. Objectives and progress live in their own tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedQuest {
    pub id: QuestId,
    pub character_id: CharacterId,
    pub title: String,
    pub description: String,
    pub content_type: ContentType,
    pub difficulty: Difficulty,
    pub world_effects: Vec<WorldEffect>,
    pub metadata: ContentMetadata,
    pub status: QuestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Tier-3 score of the stored content, recorded even for fallbacks.
    pub validation_score: f64,
    /// AI attempts spent before this content was stored.
    pub generation_attempts: u32,
    /// Completion narrative, once completed.
    #[serde(default)]
    pub consequence: Option<String>,
}

impl PersistedQuest {
    pub fn is_fallback(&self) -> bool {
        self.metadata.is_fallback
    }
}

/// A persisted objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestObjective {
    pub id: ObjectiveId,
    pub quest_id: QuestId,
    /// Order within the quest, from 0.
    pub position: usize,
    pub description: String,
    pub reward_stat: Stat,
    pub reward_xp: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QuestObjective {
    pub fn from_objective(quest_id: QuestId, position: usize, objective: &Objective) -> Self {
        Self {
            id: ObjectiveId::new(),
            quest_id,
            position,
            description: objective.description.clone(),
            reward_stat: objective.reward_stat,
            reward_xp: objective.reward_xp,
            completed: false,
            completed_at: None,
        }
    }
}

/// Completion tracker for one quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestProgress {
    pub quest_id: QuestId,
    pub completed_objectives: usize,
    pub total_objectives: usize,
    /// 0.0 to 100.0.
    pub percent: f64,
}

impl QuestProgress {
    pub fn zero(quest_id: QuestId, total_objectives: usize) -> Self {
        Self {
            quest_id,
            completed_objectives: 0,
            total_objectives,
            percent: 0.0,
        }
    }

    /// Recompute from the objective rows.
    pub fn recompute(quest_id: QuestId, objectives: &[QuestObjective]) -> Self {
        let total = objectives.len();
        let completed = objectives.iter().filter(|o| o.completed).count();
        let percent = if total == 0 {
            0.0
        } else {
            completed as f64 * 100.0 / total as f64
        };
        Self {
            quest_id,
            completed_objectives: completed,
            total_objectives: total,
            percent,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_objectives > 0 && self.completed_objectives == self.total_objectives
    }
}

/// Kinds of narrative events recorded alongside quest transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeEventKind {
    QuestOffered,
    QuestStarted,
    ObjectiveCompleted,
    QuestCompleted,
    QuestAbandoned,
    QuestExpired,
}

impl NarrativeEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            NarrativeEventKind::QuestOffered => "quest_offered",
            NarrativeEventKind::QuestStarted => "quest_started",
            NarrativeEventKind::ObjectiveCompleted => "objective_completed",
            NarrativeEventKind::QuestCompleted => "quest_completed",
            NarrativeEventKind::QuestAbandoned => "quest_abandoned",
            NarrativeEventKind::QuestExpired => "quest_expired",
        }
    }
}

/// A story event derived from a quest transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeEvent {
    pub id: Uuid,
    pub character_id: CharacterId,
    pub quest_id: Option<QuestId>,
    pub kind: NarrativeEventKind,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl NarrativeEvent {
    pub fn new(
        character_id: CharacterId,
        quest_id: Option<QuestId>,
        kind: NarrativeEventKind,
        summary: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            character_id,
            quest_id,
            kind,
            summary: summary.into(),
            created_at,
        }
    }
}

/// A quest row with its objectives and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestBundle {
    pub quest: PersistedQuest,
    pub objectives: Vec<QuestObjective>,
    pub progress: QuestProgress,
}

impl QuestBundle {
    /// Prepare the rows for newly validated content.
    #[allow(clippy::too_many_arguments)]
    pub fn from_content(
        character_id: CharacterId,
        content: GeneratedContent,
        content_type: ContentType,
        difficulty: Difficulty,
        validation_score: f64,
        generation_attempts: u32,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let id = QuestId::new();
        let objectives: Vec<QuestObjective> = content
            .objectives
            .iter()
            .enumerate()
            .map(|(i, o)| QuestObjective::from_objective(id, i, o))
            .collect();
        let progress = QuestProgress::zero(id, objectives.len());

        Self {
            quest: PersistedQuest {
                id,
                character_id,
                title: content.title,
                description: content.description,
                content_type,
                difficulty,
                world_effects: content.world_effects,
                metadata: content.metadata,
                status: QuestStatus::Available,
                created_at,
                expires_at,
                started_at: None,
                completed_at: None,
                validation_score,
                generation_attempts,
                consequence: None,
            },
            objectives,
            progress,
        }
    }
}
