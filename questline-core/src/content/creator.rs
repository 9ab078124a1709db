//! The Quest Creator: turns a decision and its context into quest content.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::quest::{parse_quest, GeneratedContent, MAX_OBJECTIVES, MAX_OBJECTIVE_XP, MIN_OBJECTIVES};
use super::templates::fallback_quest;
use super::ContentError;
use crate::character::Character;
use crate::context::GenerationContext;
use crate::decision::Decision;
use crate::generation::{ChatMessage, GenerationClient};

/// Feedback carried into a regeneration attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Revision {
    /// 1-based attempt number being produced.
    pub attempt: u32,
    /// Issues reported by validation on the previous attempt.
    pub notes: Vec<String>,
}

/// Generates quests through the Generation Client.
pub struct QuestCreator {
    client: Arc<GenerationClient>,
}

impl QuestCreator {
    pub fn new(client: Arc<GenerationClient>) -> Self {
        Self { client }
    }

    /// Generate quest content. Fails with a typed error rather than returning partial content.
    pub async fn generate(
        &self,
        decision: &Decision,
        character: &Character,
        context: &GenerationContext,
        revision: Option<&Revision>,
    ) -> Result<GeneratedContent, ContentError> {
        if !decision.needs_content {
            return Err(ContentError::NoContentRequested);
        }

        let temperature = match revision {
            Some(_) => self.client.config().retry_temperature,
            None => self.client.config().content_temperature,
        };
        let request = self
            .client
            .request(QUEST_SYSTEM_PROMPT)
            .with_temperature(temperature)
            .with_message(ChatMessage::user(quest_prompt(
                decision, character, context, revision,
            )));

        let (mut content, response) = self
            .client
            .generate_parsed(&request, |text| {
                let content = parse_quest(text)?;
                content.check_structure()?;
                Ok::<_, ContentError>(content)
            })
            .await?;

        content.metadata.is_fallback = false;
        content.metadata.model = Some(response.model);
        content.metadata.attempt = revision.map(|r| r.attempt).unwrap_or(1);
        content.metadata.latency_ms = response.latency_ms;
        content.metadata.cost = response.cost;
        content.metadata.cached = response.cached;

        debug!(
            character_id = %character.id,
            title = %content.title,
            objectives = content.objectives.len(),
            attempt = content.metadata.attempt,
            "quest generated"
        );
        Ok(content)
    }

    /// Deterministic, zero-network content that is always structurally valid.
    pub fn fallback_template(decision: &Decision, character: &Character) -> GeneratedContent {
        info!(
            character_id = %character.id,
            content_type = decision.content_type.name(),
            "using fallback quest template"
        );
        fallback_quest(decision, character)
    }
}

const QUEST_SYSTEM_PROMPT: &str = "You write quests for a character-growth fantasy game. Stay \
inside the canon you are given, build on what has already happened to the character, and \
respond with a single JSON object and nothing else.";

static QUEST_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["title", "description", "objectives"],
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "objectives": {
                "type": "array",
                "minItems": MIN_OBJECTIVES,
                "maxItems": MAX_OBJECTIVES,
                "items": {
                    "type": "object",
                    "required": ["description", "reward_stat", "reward_xp"],
                    "properties": {
                        "description": {"type": "string"},
                        "reward_stat": {"enum": ["STR", "DEX", "CON", "INT", "WIS", "CHA"]},
                        "reward_xp": {"type": "integer", "minimum": 1, "maximum": MAX_OBJECTIVE_XP}
                    }
                }
            },
            "world_effects": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["flag", "value"],
                    "properties": {
                        "flag": {"type": "string"},
                        "value": {"type": "string"}
                    }
                }
            }
        }
    })
});

fn quest_prompt(
    decision: &Decision,
    character: &Character,
    context: &GenerationContext,
    revision: Option<&Revision>,
) -> String {
    let mut prompt = context.to_prompt();

    prompt.push_str("\n## Request\n");
    prompt.push_str(&format!(
        "Write a {} quest for {} about \"{}\". Difficulty: {}. Tone: {}.\n",
        decision.content_type.name(),
        character.name,
        decision.theme,
        decision.difficulty.name(),
        decision.expected_tone().name(),
    ));
    if let Some(stat) = decision.target_stat {
        prompt.push_str(&format!(
            "Every objective must reward {} ({}).\n",
            stat.name(),
            stat.code()
        ));
    }

    if let Some(revision) = revision.filter(|r| !r.notes.is_empty()) {
        prompt.push_str("\nThe previous draft was rejected. Fix these problems:\n");
        for note in &revision.notes {
            prompt.push_str(&format!("- {note}\n"));
        }
    }

    prompt.push_str("\nReturn JSON matching this schema:\n");
    prompt.push_str(&QUEST_SCHEMA.to_string());
    prompt
}
