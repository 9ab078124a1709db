//! The Consequence Engine: what a finished quest changes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::quest::WorldEffect;
use super::ContentError;
use crate::character::Character;
use crate::config::ValidationConfig;
use crate::error::SchemaValidationError;
use crate::generation::schema::require_text;
use crate::generation::{parse_payload, ChatMessage, GenerationClient};
use crate::store::PersistedQuest;

/// Completion narrative plus any world changes it declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    pub narrative: String,
    pub world_effects: Vec<WorldEffect>,
    pub is_fallback: bool,
}

#[derive(Debug, Deserialize)]
struct ConsequencePayload {
    narrative: Option<String>,
    #[serde(default)]
    world_effects: Vec<WorldEffect>,
}

/// Parse a provider consequence payload.
pub fn parse_consequence(text: &str) -> Result<Consequence, SchemaValidationError> {
    let payload: ConsequencePayload = parse_payload(text)?;
    let narrative = require_text(payload.narrative, "narrative")?;
    for effect in &payload.world_effects {
        if effect.flag.trim().is_empty() {
            return Err(SchemaValidationError::InvalidValue {
                field: "world_effects.flag",
                reason: "must not be blank".to_string(),
            });
        }
    }
    Ok(Consequence {
        narrative,
        world_effects: payload.world_effects,
        is_fallback: false,
    })
}

/// Problems with a consequence narrative, judged with the tier-2 bounds.
pub fn consequence_issues(consequence: &Consequence, config: &ValidationConfig) -> Vec<String> {
    let mut issues = Vec::new();
    let (min, max) = config.description_chars;
    let len = consequence.narrative.chars().count();
    if len < min {
        issues.push(format!("narrative is too short ({len} < {min} chars)"));
    } else if len > max {
        issues.push(format!("narrative is too long ({len} > {max} chars)"));
    }

    let lower = consequence.narrative.to_lowercase();
    let hits: Vec<&str> = config
        .stock_phrases
        .iter()
        .filter(|p| lower.contains(&p.to_lowercase()))
        .map(String::as_str)
        .collect();
    if hits.len() > config.max_stock_phrases {
        issues.push(format!("generic phrasing: {}", hits.join(", ")));
    }
    issues
}

/// Generates completion narratives.
pub struct ConsequenceEngine {
    client: Arc<GenerationClient>,
}

impl ConsequenceEngine {
    pub fn new(client: Arc<GenerationClient>) -> Self {
        Self { client }
    }

    pub async fn generate(
        &self,
        quest: &PersistedQuest,
        character: &Character,
    ) -> Result<Consequence, ContentError> {
        self.generate_with_notes(quest, character, &[]).await
    }

    /// Like [`generate`](Self::generate), asking the provider to fix `notes`.
    pub async fn generate_with_notes(
        &self,
        quest: &PersistedQuest,
        character: &Character,
        notes: &[String],
    ) -> Result<Consequence, ContentError> {
        let temperature = if notes.is_empty() {
            self.client.config().content_temperature
        } else {
            self.client.config().retry_temperature
        };
        let request = self
            .client
            .request(CONSEQUENCE_SYSTEM_PROMPT)
            .with_temperature(temperature)
            .with_message(ChatMessage::user(consequence_prompt(quest, character, notes)));

        let (consequence, _) = self
            .client
            .generate_parsed(&request, |text| {
                parse_consequence(text).map_err(ContentError::from)
            })
            .await?;
        debug!(
            quest_id = %quest.id,
            effects = consequence.world_effects.len(),
            "consequence generated"
        );
        Ok(consequence)
    }

    /// Deterministic narrative; declares no effects beyond the quest's own.
    pub fn fallback(quest: &PersistedQuest, character: &Character) -> Consequence {
        info!(quest_id = %quest.id, "using fallback consequence");
        Consequence {
            narrative: format!(
                "{} returns to Emberfall with \"{}\" behind them. Word travels quickly along \
                 the Ashen Road, and the townsfolk greet {} a little more warmly than before.",
                character.name, quest.title, character.name
            ),
            world_effects: Vec::new(),
            is_fallback: true,
        }
    }
}

const CONSEQUENCE_SYSTEM_PROMPT: &str = "You narrate the aftermath of finished quests in a \
character-growth fantasy game. Keep it short and grounded. Respond with a single JSON object \
and nothing else.";

fn consequence_prompt(quest: &PersistedQuest, character: &Character, notes: &[String]) -> String {
    let mut prompt = format!(
        "{} (level {}) just completed the quest \"{}\".\n{}\n",
        character.name, character.level, quest.title, quest.description
    );
    if !quest.world_effects.is_empty() {
        prompt.push_str("Already changed in the world:\n");
        for effect in &quest.world_effects {
            prompt.push_str(&format!("- {} = {}\n", effect.flag, effect.value));
        }
    }
    if !notes.is_empty() {
        prompt.push_str("\nThe previous draft was rejected. Fix these problems:\n");
        for note in notes {
            prompt.push_str(&format!("- {note}\n"));
        }
    }
    prompt.push_str(
        "\nReturn JSON: {\"narrative\": string (2-4 sentences), \
         \"world_effects\": [{\"flag\": string, \"value\": string}]}",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::content::parse_quest;
    use crate::decision::{ContentType, Difficulty};
    use crate::error::GenerationProviderError;
    use crate::store::QuestBundle;
    use crate::testing::{quest_json, sample_character, ScriptedProvider};
    use chrono::Utc;

    fn quest() -> PersistedQuest {
        let character = sample_character();
        let content = parse_quest(&quest_json("Stones of the Quarry", 2, "STR")).unwrap();
        let now = Utc::now();
        QuestBundle::from_content(
            character.id,
            content,
            ContentType::Corrective,
            Difficulty::Medium,
            0.9,
            1,
            now,
            now,
        )
        .quest
    }

    fn engine(provider: Arc<ScriptedProvider>) -> ConsequenceEngine {
        ConsequenceEngine::new(Arc::new(GenerationClient::new(
            provider,
            GenerationConfig::default(),
        )))
    }

    #[test]
    fn test_parse_consequence() {
        let consequence = parse_consequence(
            r#"{"narrative": "The quarry runs again.", "world_effects": [{"flag": "quarry_open", "value": "true"}]}"#,
        )
        .unwrap();
        assert_eq!(consequence.world_effects[0].flag, "quarry_open");
        assert!(!consequence.is_fallback);

        assert_eq!(
            parse_consequence(r#"{"world_effects": []}"#).unwrap_err(),
            SchemaValidationError::MissingField("narrative")
        );
    }

    #[tokio::test]
    async fn test_generate_and_fallback() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_reply(r#"{"narrative": "Carts roll out of the quarry at dawn once more."}"#),
        );
        let engine = engine(provider.clone());
        let quest = quest();
        let character = sample_character();

        let consequence = engine.generate(&quest, &character).await.unwrap();
        assert!(consequence.narrative.starts_with("Carts"));

        let err = engine
            .generate_with_notes(&quest, &character, &["too short".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Provider(GenerationProviderError::Unavailable(_))));

        let fallback = ConsequenceEngine::fallback(&quest, &character);
        assert!(fallback.is_fallback);
        assert!(fallback.narrative.contains("Stones of the Quarry"));
        assert!(consequence_issues(&fallback, &ValidationConfig::default()).is_empty());
    }

    #[test]
    fn test_consequence_issues() {
        let config = ValidationConfig::default();
        let short = Consequence {
            narrative: "Done.".into(),
            world_effects: vec![],
            is_fallback: false,
        };
        assert_eq!(consequence_issues(&short, &config).len(), 1);
    }
}
