//! The Quest Service: decide, generate, validate, retry or fall back, store.
//!
//! Owns the lifecycle of persisted quests. Every state change is one store
//! transaction; provider calls happen strictly outside transactions.

mod attempts;
pub mod policy;

pub use policy::{Assessment, Attempt, Next, PolicyOutcome, RetryThenFallback, MAX_AI_ATTEMPTS};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use self::attempts::{ConsequenceAttempt, QuestAttempt};
use crate::character::{Character, CharacterId};
use crate::config::{QuestConfig, QuestlineConfig, ValidationConfig};
use crate::content::{Consequence, ConsequenceEngine, QuestCreator};
use crate::context::ContextAssembler;
use crate::decision::{Decision, DecisionSource, StoryCoordinator};
use crate::error::{ConfigError, PersistenceError, ValidationFailure};
use crate::generation::GenerationClient;
use crate::lore::LoreBook;
use crate::memory::{EventType, MemoryManager, NewEvent};
use crate::store::{
    NarrativeEvent, NarrativeEventKind, ObjectiveId, PersistedQuest, QuestBundle, QuestId,
    QuestObjective, QuestProgress, QuestStatus, Store, Transaction,
};
use crate::validation::{LoreScorer, ValidationPipeline};

/// Errors surfaced by the Quest Service.
#[derive(Debug, Error)]
pub enum QuestError {
    #[error("Character not found: {0}")]
    CharacterNotFound(CharacterId),

    #[error("Quest not found: {0}")]
    QuestNotFound(QuestId),

    #[error("Objective {objective_id} is not part of quest {quest_id}")]
    ObjectiveNotFound {
        quest_id: QuestId,
        objective_id: ObjectiveId,
    },

    #[error("Quest {quest_id} is {status}, cannot {action}")]
    InvalidState {
        quest_id: QuestId,
        status: &'static str,
        action: &'static str,
    },

    #[error("Objective {0} is already completed")]
    AlreadyCompleted(ObjectiveId),

    #[error("Cannot generate: {0}")]
    CannotGenerate(#[from] ValidationFailure),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A quest that was validated (or fell back) and stored.
#[derive(Debug, Clone)]
pub struct StoredQuest {
    pub bundle: QuestBundle,
    pub decision: Decision,
    pub decision_source: DecisionSource,
    pub ai_attempts: u32,
    pub used_fallback: bool,
    /// Issues raised on the stored content, for observability.
    pub issues: Vec<String>,
}

/// The result of one generation cycle.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The decision called for nothing; no generation call was made.
    NoContent {
        decision: Decision,
        decision_source: DecisionSource,
    },
    Stored(Box<StoredQuest>),
}

impl GenerationOutcome {
    pub fn stored(&self) -> Option<&StoredQuest> {
        match self {
            GenerationOutcome::Stored(stored) => Some(stored),
            GenerationOutcome::NoContent { .. } => None,
        }
    }
}

/// What completing an objective changed.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub objective: QuestObjective,
    pub progress: QuestProgress,
    /// Stat points gained from the objective's XP.
    pub stat_points_gained: u32,
    /// Present when this completion finished the quest.
    pub consequence: Option<Consequence>,
}

impl CompletionOutcome {
    pub fn quest_completed(&self) -> bool {
        self.consequence.is_some()
    }
}

/// Orchestrates the generation pipeline and quest lifecycle.
pub struct QuestService {
    store: Arc<Store>,
    memory: Arc<MemoryManager>,
    coordinator: StoryCoordinator,
    assembler: ContextAssembler,
    creator: QuestCreator,
    consequences: ConsequenceEngine,
    pipeline: ValidationPipeline,
    policy: RetryThenFallback,
    config: QuestConfig,
}

impl QuestService {
    pub fn new(
        store: Arc<Store>,
        client: Arc<GenerationClient>,
        memory: Arc<MemoryManager>,
        lore: Arc<LoreBook>,
        lorekeeper: Arc<dyn LoreScorer>,
        config: &QuestlineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline =
            ValidationPipeline::new(config.validation.clone(), lore.clone(), lorekeeper)?;
        let assembler = ContextAssembler::new(
            memory.clone(),
            store.clone(),
            lore,
            config.quest.lore_excerpt_chars,
            config.memory.retrieval_limit,
        );

        Ok(Self {
            coordinator: StoryCoordinator::new(client.clone(), config.decision.clone()),
            creator: QuestCreator::new(client.clone()),
            consequences: ConsequenceEngine::new(client),
            assembler,
            pipeline,
            store,
            memory,
            policy: RetryThenFallback::new(),
            config: config.quest.clone(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    fn validation_config(&self) -> &ValidationConfig {
        self.pipeline.config()
    }

    /// Run one full generation cycle for a character.
    pub async fn generate_for(
        &self,
        character_id: CharacterId,
    ) -> Result<GenerationOutcome, QuestError> {
        let character = self
            .store
            .character(character_id)
            .await
            .ok_or(QuestError::CharacterNotFound(character_id))?;
        let active = self.store.open_quest_count(character_id).await;

        let (decision, decision_source) =
            self.coordinator.decide_with_source(&character, active).await;
        if !decision.needs_content {
            info!(
                character_id = %character_id,
                reasoning = %decision.reasoning,
                "no content needed"
            );
            return Ok(GenerationOutcome::NoContent {
                decision,
                decision_source,
            });
        }

        let context = self.assembler.assemble(&character, &decision).await;
        let input = self.pipeline.validate_input(&character, &decision, &context);
        if !input.passed {
            warn!(
                character_id = %character_id,
                tier = %input.tier,
                issues = ?input.issues,
                "input validation failed, aborting generation"
            );
            return Err(ValidationFailure::new(input).into());
        }

        let attempt = QuestAttempt {
            creator: &self.creator,
            pipeline: &self.pipeline,
            decision: &decision,
            character: &character,
            context: &context,
        };
        let outcome = self.policy.run(&attempt).await;

        let now = Utc::now();
        let bundle = QuestBundle::from_content(
            character_id,
            outcome.value,
            decision.content_type,
            decision.difficulty,
            outcome.assessment.score,
            outcome.ai_attempts,
            now,
            now + self.config.expiry,
        );
        let quest_id = bundle.quest.id;
        let title = bundle.quest.title.clone();

        let mut tx = self.store.begin().await;
        tx.insert_bundle(
            bundle.clone(),
            NarrativeEvent::new(
                character_id,
                Some(quest_id),
                NarrativeEventKind::QuestOffered,
                format!("{} was offered \"{}\"", character.name, title),
                now,
            ),
        )?;
        tx.commit();

        info!(
            character_id = %character_id,
            quest_id = %quest_id,
            score = outcome.assessment.score,
            is_fallback = outcome.used_fallback,
            ai_attempts = outcome.ai_attempts,
            "quest stored"
        );
        self.remember(
            character_id,
            NewEvent::new(EventType::QuestOffered, format!("Was offered the quest \"{title}\"")),
        )
        .await;

        Ok(GenerationOutcome::Stored(Box::new(StoredQuest {
            bundle,
            decision,
            decision_source,
            ai_attempts: outcome.ai_attempts,
            used_fallback: outcome.used_fallback,
            issues: outcome.assessment.issues,
        })))
    }

    /// Available to active.
    pub async fn start(&self, quest_id: QuestId) -> Result<PersistedQuest, QuestError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await;
        let quest = transition(&mut tx, quest_id, QuestStatus::Active, "start", now)?;
        tx.insert_event(NarrativeEvent::new(
            quest.character_id,
            Some(quest_id),
            NarrativeEventKind::QuestStarted,
            format!("Started \"{}\"", quest.title),
            now,
        ))?;
        tx.commit();

        info!(quest_id = %quest_id, "quest started");
        self.remember(
            quest.character_id,
            NewEvent::new(EventType::QuestStarted, format!("Set out on \"{}\"", quest.title)),
        )
        .await;
        Ok(quest)
    }

    /// Available or active to abandoned.
    pub async fn abandon(&self, quest_id: QuestId) -> Result<PersistedQuest, QuestError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await;
        let quest = transition(&mut tx, quest_id, QuestStatus::Abandoned, "abandon", now)?;
        tx.insert_event(NarrativeEvent::new(
            quest.character_id,
            Some(quest_id),
            NarrativeEventKind::QuestAbandoned,
            format!("Abandoned \"{}\"", quest.title),
            now,
        ))?;
        tx.commit();

        info!(quest_id = %quest_id, "quest abandoned");
        self.remember(
            quest.character_id,
            NewEvent::new(EventType::QuestAbandoned, format!("Gave up on \"{}\"", quest.title)),
        )
        .await;
        Ok(quest)
    }

    /// Complete one objective of an active quest.
    ///
    /// When it is the last open objective, the consequence is generated first
    /// and the quest completes in the same transaction as the objective.
    pub async fn complete_objective(
        &self,
        quest_id: QuestId,
        objective_id: ObjectiveId,
    ) -> Result<CompletionOutcome, QuestError> {
        let bundle = self
            .store
            .quest_bundle(quest_id)
            .await
            .ok_or(QuestError::QuestNotFound(quest_id))?;
        let character = self
            .store
            .character(bundle.quest.character_id)
            .await
            .ok_or(QuestError::CharacterNotFound(bundle.quest.character_id))?;
        let objective = bundle
            .objectives
            .iter()
            .find(|o| o.id == objective_id)
            .ok_or(QuestError::ObjectiveNotFound {
                quest_id,
                objective_id,
            })?;
        if objective.completed {
            return Err(QuestError::AlreadyCompleted(objective_id));
        }
        if bundle.quest.status != QuestStatus::Active {
            return Err(QuestError::InvalidState {
                quest_id,
                status: bundle.quest.status.name(),
                action: "complete objectives",
            });
        }

        let finishes_quest = bundle.objectives.iter().filter(|o| !o.completed).count() == 1;
        let consequence = if finishes_quest {
            Some(self.consequence_for(&bundle.quest, &character).await)
        } else {
            None
        };

        let now = Utc::now();
        let mut tx = self.store.begin().await;

        // Re-check under the transaction: another completion may have landed.
        let status = tx.state().quest(quest_id).map(|q| q.status);
        if status != Some(QuestStatus::Active) {
            return Err(QuestError::InvalidState {
                quest_id,
                status: status.map(|s| s.name()).unwrap_or("missing"),
                action: "complete objectives",
            });
        }
        let objective = match tx.complete_objective(objective_id, now) {
            Ok(objective) => objective,
            Err(PersistenceError::Conflict(_)) => {
                return Err(QuestError::AlreadyCompleted(objective_id))
            }
            Err(e) => return Err(e.into()),
        };
        let progress = tx.update_progress(quest_id)?;
        let stat_points_gained =
            tx.award_reward(character.id, objective.reward_stat, objective.reward_xp)?;

        let consequence = if progress.is_complete() {
            let consequence = consequence
                .unwrap_or_else(|| ConsequenceEngine::fallback(&bundle.quest, &character));
            let quest = tx.update_status(quest_id, QuestStatus::Completed, now)?;
            for effect in quest.world_effects.iter().chain(&consequence.world_effects) {
                tx.apply_world_effect(effect)?;
            }
            tx.set_consequence(quest_id, consequence.narrative.clone())?;
            tx.insert_event(NarrativeEvent::new(
                character.id,
                Some(quest_id),
                NarrativeEventKind::QuestCompleted,
                consequence.narrative.clone(),
                now,
            ))?;
            Some(consequence)
        } else {
            tx.insert_event(NarrativeEvent::new(
                character.id,
                Some(quest_id),
                NarrativeEventKind::ObjectiveCompleted,
                format!("Completed \"{}\"", objective.description),
                now,
            ))?;
            None
        };
        tx.commit();

        info!(
            quest_id = %quest_id,
            objective_id = %objective_id,
            percent = progress.percent,
            quest_completed = consequence.is_some(),
            "objective completed"
        );

        let mut memory_event = match &consequence {
            Some(c) => NewEvent::new(
                EventType::QuestCompleted,
                format!("Completed the quest \"{}\". {}", bundle.quest.title, c.narrative),
            ),
            None => NewEvent::new(
                EventType::ObjectiveCompleted,
                format!("{} ({})", objective.description, bundle.quest.title),
            ),
        };
        if stat_points_gained > 0 {
            memory_event =
                memory_event.with_stat_change(objective.reward_stat, stat_points_gained as i32);
        }
        self.remember(character.id, memory_event).await;

        Ok(CompletionOutcome {
            objective,
            progress,
            stat_points_gained,
            consequence,
        })
    }

    /// Expire every available quest whose horizon has passed.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<QuestId>, QuestError> {
        let mut tx = self.store.begin().await;
        let stale: Vec<(QuestId, CharacterId, String)> = tx
            .state()
            .quests()
            .filter(|q| q.status == QuestStatus::Available && q.expires_at <= now)
            .map(|q| (q.id, q.character_id, q.title.clone()))
            .collect();

        for (quest_id, character_id, title) in &stale {
            tx.update_status(*quest_id, QuestStatus::Expired, now)?;
            tx.insert_event(NarrativeEvent::new(
                *character_id,
                Some(*quest_id),
                NarrativeEventKind::QuestExpired,
                format!("\"{title}\" expired unstarted"),
                now,
            ))?;
        }
        tx.commit();

        if !stale.is_empty() {
            info!(expired = stale.len(), "stale quests expired");
        }
        for (_, character_id, title) in &stale {
            self.remember(
                *character_id,
                NewEvent::new(EventType::QuestExpired, format!("Let \"{title}\" lapse")),
            )
            .await;
        }
        Ok(stale.into_iter().map(|(id, _, _)| id).collect())
    }

    async fn consequence_for(&self, quest: &PersistedQuest, character: &Character) -> Consequence {
        let attempt = ConsequenceAttempt {
            engine: &self.consequences,
            quest,
            character,
            config: self.validation_config(),
        };
        self.policy.run(&attempt).await.value
    }

    /// Working memory is best-effort: the quest state is already committed.
    async fn remember(&self, character_id: CharacterId, event: NewEvent) {
        if let Err(e) = self.memory.append_event(character_id, event).await {
            warn!(
                character_id = %character_id,
                error = %e,
                "failed to record working memory event"
            );
        }
    }
}

fn transition(
    tx: &mut Transaction<'_>,
    quest_id: QuestId,
    to: QuestStatus,
    action: &'static str,
    at: DateTime<Utc>,
) -> Result<PersistedQuest, QuestError> {
    let status = tx
        .state()
        .quest(quest_id)
        .map(|q| q.status)
        .ok_or(QuestError::QuestNotFound(quest_id))?;
    if !status.can_transition_to(to) {
        return Err(QuestError::InvalidState {
            quest_id,
            status: status.name(),
            action,
        });
    }
    Ok(tx.update_status(quest_id, to, at)?)
}
