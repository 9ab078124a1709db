//! Structured quest content and its structural contract.

use serde::{Deserialize, Serialize};

use super::ContentError;
use crate::character::Stat;
use crate::error::SchemaValidationError;
use crate::generation::parse_payload;
use crate::generation::schema::require_text;

/// Objective count bounds, inclusive.
pub const MIN_OBJECTIVES: usize = 1;
pub const MAX_OBJECTIVES: usize = 5;

/// Upper bound on XP for a single objective.
pub const MAX_OBJECTIVE_XP: u32 = 500;

/// One step of a quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub description: String,
    pub reward_stat: Stat,
    pub reward_xp: u32,
}

impl Objective {
    pub fn new(description: impl Into<String>, reward_stat: Stat, reward_xp: u32) -> Self {
        Self {
            description: description.into(),
            reward_stat,
            reward_xp,
        }
    }
}

/// A world-state flag set when content completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEffect {
    pub flag: String,
    pub value: String,
}

impl WorldEffect {
    pub fn new(flag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            value: value.into(),
        }
    }
}

/// Where content came from and what it cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub is_fallback: bool,
    /// Provider model, absent for templates.
    pub model: Option<String>,
    /// 1-based generation attempt that produced this content.
    pub attempt: u32,
    pub latency_ms: u64,
    pub cost: f64,
    pub cached: bool,
}

impl ContentMetadata {
    pub fn fallback() -> Self {
        Self {
            is_fallback: true,
            ..Self::default()
        }
    }
}

/// A generated quest before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub title: String,
    pub description: String,
    pub objectives: Vec<Objective>,
    #[serde(default)]
    pub world_effects: Vec<WorldEffect>,
    #[serde(default)]
    pub metadata: ContentMetadata,
}

impl GeneratedContent {
    /// Check the structural contract: bounded objectives, no blank text, sane rewards.
    pub fn check_structure(&self) -> Result<(), ContentError> {
        let mut problems = Vec::new();

        if self.title.trim().is_empty() {
            problems.push("title is blank".to_string());
        }
        if self.description.trim().is_empty() {
            problems.push("description is blank".to_string());
        }
        let count = self.objectives.len();
        if !(MIN_OBJECTIVES..=MAX_OBJECTIVES).contains(&count) {
            problems.push(format!(
                "{count} objectives (expected {MIN_OBJECTIVES}-{MAX_OBJECTIVES})"
            ));
        }
        for (i, objective) in self.objectives.iter().enumerate() {
            if objective.description.trim().is_empty() {
                problems.push(format!("objective {} has no description", i + 1));
            }
            if objective.reward_xp == 0 || objective.reward_xp > MAX_OBJECTIVE_XP {
                problems.push(format!(
                    "objective {} rewards {} XP (expected 1-{MAX_OBJECTIVE_XP})",
                    i + 1,
                    objective.reward_xp
                ));
            }
        }
        for effect in &self.world_effects {
            if effect.flag.trim().is_empty() {
                problems.push("world effect with blank flag".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ContentError::Structure(problems))
        }
    }

    /// All free text, for heuristics and lore checks.
    pub fn full_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.description);
        for objective in &self.objectives {
            text.push('\n');
            text.push_str(&objective.description);
        }
        text
    }

    pub fn total_xp(&self) -> u32 {
        self.objectives.iter().map(|o| o.reward_xp).sum()
    }
}

#[derive(Debug, Deserialize)]
struct QuestPayload {
    title: Option<String>,
    description: Option<String>,
    objectives: Option<Vec<ObjectivePayload>>,
    #[serde(default)]
    world_effects: Vec<WorldEffect>,
}

#[derive(Debug, Deserialize)]
struct ObjectivePayload {
    description: Option<String>,
    reward_stat: Option<String>,
    reward_xp: Option<u32>,
}

/// Parse a provider quest payload. Structure is checked separately.
pub fn parse_quest(text: &str) -> Result<GeneratedContent, SchemaValidationError> {
    let payload: QuestPayload = parse_payload(text)?;

    let title = require_text(payload.title, "title")?;
    let description = require_text(payload.description, "description")?;
    let objectives = payload
        .objectives
        .ok_or(SchemaValidationError::MissingField("objectives"))?
        .into_iter()
        .map(|o| {
            let reward_stat = o
                .reward_stat
                .ok_or(SchemaValidationError::MissingField("reward_stat"))?
                .parse::<Stat>()
                .map_err(|reason| SchemaValidationError::InvalidValue {
                    field: "reward_stat",
                    reason,
                })?;
            Ok(Objective {
                description: require_text(o.description, "objective.description")?,
                reward_stat,
                reward_xp: o
                    .reward_xp
                    .ok_or(SchemaValidationError::MissingField("reward_xp"))?,
            })
        })
        .collect::<Result<Vec<_>, SchemaValidationError>>()?;

    Ok(GeneratedContent {
        title,
        description,
        objectives,
        world_effects: payload.world_effects,
        metadata: ContentMetadata::default(),
    })
}
