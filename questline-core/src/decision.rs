//! The Story Coordinator: decides whether a character needs new content.
//!
//! The provider is asked first; anything it returns is parsed strictly and
//! anything unusable is replaced by a deterministic rule. `decide` itself
//! never fails.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::character::{Character, Stat};
use crate::config::DecisionConfig;
use crate::error::{ReplyError, SchemaValidationError};
use crate::generation::{parse_payload, ChatMessage, GenerationClient};

/// What kind of content to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Main,
    Side,
    /// Aimed at the character's weakest stat.
    Corrective,
}

impl ContentType {
    pub fn name(&self) -> &'static str {
        match self {
            ContentType::Main => "main",
            ContentType::Side => "side",
            ContentType::Corrective => "corrective",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(ContentType::Main),
            "side" => Ok(ContentType::Side),
            "corrective" => Ok(ContentType::Corrective),
            other => Err(format!("unknown content type '{other}'")),
        }
    }
}

/// How demanding the content should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn name(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Base XP for a single objective at this difficulty.
    pub fn base_xp(&self) -> u32 {
        match self {
            Difficulty::Easy => 25,
            Difficulty::Medium => 50,
            Difficulty::Hard => 100,
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// Emotional register expected from the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Heroic,
    Hopeful,
    Mysterious,
    Somber,
    Lighthearted,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Heroic,
        Tone::Hopeful,
        Tone::Mysterious,
        Tone::Somber,
        Tone::Lighthearted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tone::Heroic => "heroic",
            Tone::Hopeful => "hopeful",
            Tone::Mysterious => "mysterious",
            Tone::Somber => "somber",
            Tone::Lighthearted => "lighthearted",
        }
    }

    /// Words that signal this tone.
    pub fn lexicon(&self) -> &'static [&'static str] {
        match self {
            Tone::Heroic => &[
                "brave", "courage", "defend", "champion", "valor", "stand", "protect", "rally",
                "triumph", "honor", "glory", "fight",
            ],
            Tone::Hopeful => &[
                "hope", "grow", "improve", "practice", "steady", "learn", "mend", "strength",
                "progress", "renew", "train", "better",
            ],
            Tone::Mysterious => &[
                "secret", "hidden", "whisper", "strange", "unknown", "riddle", "shadow",
                "forgotten", "curious", "veiled", "rumor", "lost",
            ],
            Tone::Somber => &[
                "grief", "loss", "mourn", "ruin", "ash", "sorrow", "fallen", "silence", "burden",
                "memorial", "cold", "bleak",
            ],
            Tone::Lighthearted => &[
                "festival", "laugh", "merry", "song", "game", "friendly", "feast", "dance",
                "cheer", "prank", "market", "fun",
            ],
        }
    }
}

impl std::str::FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Tone::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("unknown tone '{needle}'"))
    }
}

/// The Story Coordinator's answer.
///
/// When `needs_content` is false nothing else is consumed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub needs_content: bool,
    pub content_type: ContentType,
    pub theme: String,
    pub difficulty: Difficulty,
    /// Mandatory for corrective content.
    pub target_stat: Option<Stat>,
    pub reasoning: String,
    /// Overrides the tone implied by the content type.
    #[serde(default)]
    pub tone: Option<Tone>,
}

impl Decision {
    /// A decision that no content is needed.
    pub fn no_content(reasoning: impl Into<String>) -> Self {
        Self {
            needs_content: false,
            content_type: ContentType::Side,
            theme: String::new(),
            difficulty: Difficulty::Easy,
            target_stat: None,
            reasoning: reasoning.into(),
            tone: None,
        }
    }

    /// A corrective decision targeting `stat`.
    pub fn corrective(stat: Stat, difficulty: Difficulty, reasoning: impl Into<String>) -> Self {
        Self {
            needs_content: true,
            content_type: ContentType::Corrective,
            theme: format!("training {}", stat.name().to_lowercase()),
            difficulty,
            target_stat: Some(stat),
            reasoning: reasoning.into(),
            tone: None,
        }
    }

    /// A generic side decision.
    pub fn side(theme: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            needs_content: true,
            content_type: ContentType::Side,
            theme: theme.into(),
            difficulty: Difficulty::Medium,
            target_stat: None,
            reasoning: reasoning.into(),
            tone: None,
        }
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// The tone content for this decision should carry.
    pub fn expected_tone(&self) -> Tone {
        self.tone.unwrap_or(match self.content_type {
            ContentType::Main => Tone::Heroic,
            ContentType::Side => Tone::Lighthearted,
            ContentType::Corrective => Tone::Hopeful,
        })
    }

    /// Check the cross-field rules.
    pub fn validate(&self) -> Result<(), SchemaValidationError> {
        if !self.needs_content {
            return Ok(());
        }
        if self.content_type == ContentType::Corrective && self.target_stat.is_none() {
            return Err(SchemaValidationError::MissingField("target_stat"));
        }
        if self.theme.trim().is_empty() {
            return Err(SchemaValidationError::InvalidValue {
                field: "theme",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Wire shape of a decision payload. Everything optional so absence is reported precisely.
#[derive(Debug, Deserialize)]
struct DecisionPayload {
    needs_content: Option<bool>,
    content_type: Option<String>,
    theme: Option<String>,
    difficulty: Option<String>,
    target_stat: Option<String>,
    reasoning: Option<String>,
    tone: Option<String>,
}

/// Parse and strictly validate a provider decision.
pub fn parse_decision(text: &str) -> Result<Decision, SchemaValidationError> {
    let payload: DecisionPayload = parse_payload(text)?;

    let needs_content = payload
        .needs_content
        .ok_or(SchemaValidationError::MissingField("needs_content"))?;
    let reasoning = payload
        .reasoning
        .ok_or(SchemaValidationError::MissingField("reasoning"))?;

    if !needs_content {
        return Ok(Decision::no_content(reasoning));
    }

    let content_type: ContentType = parse_enum(payload.content_type, "content_type")?;
    let difficulty: Difficulty = parse_enum(payload.difficulty, "difficulty")?;
    let theme = crate::generation::schema::require_text(payload.theme, "theme")?;

    let target_stat = match payload.target_stat {
        Some(raw) if !raw.trim().is_empty() => Some(raw.parse::<Stat>().map_err(|reason| {
            SchemaValidationError::InvalidValue {
                field: "target_stat",
                reason,
            }
        })?),
        _ => None,
    };
    let tone = match payload.tone {
        Some(raw) => Some(
            raw.parse::<Tone>()
                .map_err(|reason| SchemaValidationError::InvalidValue {
                    field: "tone",
                    reason,
                })?,
        ),
        None => None,
    };

    let decision = Decision {
        needs_content,
        content_type,
        theme,
        difficulty,
        target_stat,
        reasoning,
        tone,
    };
    decision.validate()?;
    Ok(decision)
}

fn parse_enum<T: std::str::FromStr<Err = String>>(
    value: Option<String>,
    field: &'static str,
) -> Result<T, SchemaValidationError> {
    value
        .ok_or(SchemaValidationError::MissingField(field))?
        .parse::<T>()
        .map_err(|reason| SchemaValidationError::InvalidValue { field, reason })
}

/// The deterministic decision rule.
///
/// At or over the active ceiling: nothing. A stat trailing the mean by the
/// configured gap: corrective content for it. Otherwise: a side quest.
pub fn fallback_decision(
    character: &Character,
    active_content_count: usize,
    config: &DecisionConfig,
) -> Decision {
    if active_content_count >= config.max_active_quests {
        return Decision::no_content(format!(
            "{} already has {} open quests (limit {})",
            character.name, active_content_count, config.max_active_quests
        ));
    }

    let mean = character.stats.mean();
    if let Some((stat, value)) = character.stats.weakest() {
        let gap = mean - f64::from(value);
        if gap >= config.corrective_stat_gap {
            let difficulty = if gap >= config.corrective_stat_gap * 2.0 {
                Difficulty::Easy
            } else {
                Difficulty::Medium
            };
            return Decision::corrective(
                stat,
                difficulty,
                format!(
                    "{} trails the stat average by {:.1} points",
                    stat.name(),
                    gap
                ),
            );
        }
    }

    Decision::side(
        "local errand",
        "stats are balanced; a side quest keeps the story moving",
    )
}

/// Whether a decision came from the provider or the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Provider,
    Rules,
}

/// Decides whether and what to generate.
pub struct StoryCoordinator {
    client: Arc<GenerationClient>,
    config: DecisionConfig,
}

impl StoryCoordinator {
    pub fn new(client: Arc<GenerationClient>, config: DecisionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Decide for `character`. Always returns a valid decision.
    pub async fn decide(&self, character: &Character, active_content_count: usize) -> Decision {
        self.decide_with_source(character, active_content_count)
            .await
            .0
    }

    /// Like [`decide`](Self::decide), also reporting where the decision came from.
    pub async fn decide_with_source(
        &self,
        character: &Character,
        active_content_count: usize,
    ) -> (Decision, DecisionSource) {
        // No provider cost on a foregone answer.
        if active_content_count >= self.config.max_active_quests {
            debug!(
                character_id = %character.id,
                active_content_count,
                "active ceiling reached, skipping decision call"
            );
            return (
                fallback_decision(character, active_content_count, &self.config),
                DecisionSource::Rules,
            );
        }

        let request = self
            .client
            .request(DECISION_SYSTEM_PROMPT)
            .with_temperature(self.client.config().decision_temperature)
            .with_message(ChatMessage::user(decision_prompt(
                character,
                active_content_count,
                &self.config,
            )));

        let outcome = self
            .client
            .generate_parsed(&request, |text| {
                parse_decision(text).map_err(ReplyError::from)
            })
            .await
            .map(|(decision, _)| decision)
            .map_err(|e| e.to_string());

        match outcome {
            Ok(decision) => {
                info!(
                    character_id = %character.id,
                    needs_content = decision.needs_content,
                    content_type = decision.content_type.name(),
                    "decision from provider"
                );
                (decision, DecisionSource::Provider)
            }
            Err(reason) => {
                warn!(
                    character_id = %character.id,
                    reason = %reason,
                    "decision unusable, applying rule-based fallback"
                );
                (
                    fallback_decision(character, active_content_count, &self.config),
                    DecisionSource::Rules,
                )
            }
        }
    }
}

const DECISION_SYSTEM_PROMPT: &str = "You are the story coordinator for a character-growth \
game. Decide whether the character needs a new quest. Respond with a single JSON object and \
nothing else.";

fn decision_prompt(character: &Character, active: usize, config: &DecisionConfig) -> String {
    let stats = character
        .stats
        .iter()
        .map(|(stat, value)| format!("{stat} {value}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Character: {name} (level {level})\nStats: {stats}\nOpen quests: {active} (limit {limit})\n\n\
         Return JSON with fields:\n\
         - needs_content: boolean\n\
         - content_type: \"main\" | \"side\" | \"corrective\"\n\
         - theme: short phrase\n\
         - difficulty: \"easy\" | \"medium\" | \"hard\"\n\
         - target_stat: one of STR, DEX, CON, INT, WIS, CHA (required for corrective)\n\
         - tone: optional, one of heroic, hopeful, mysterious, somber, lighthearted\n\
         - reasoning: one sentence",
        name = character.name,
        level = character.level,
        limit = config.max_active_quests,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::StatBlock;
    use crate::config::GenerationConfig;
    use crate::error::GenerationProviderError;
    use crate::testing::{decision_json, sample_character, ScriptedProvider};

    fn coordinator(provider: Arc<ScriptedProvider>) -> StoryCoordinator {
        let client = Arc::new(GenerationClient::new(provider, GenerationConfig::default()));
        StoryCoordinator::new(client, DecisionConfig::default())
    }

    #[test]
    fn test_parse_decision_strict() {
        let decision = parse_decision(&decision_json("corrective", Some("STR"))).unwrap();
        assert_eq!(decision.content_type, ContentType::Corrective);
        assert_eq!(decision.target_stat, Some(Stat::Strength));

        // Corrective without a target stat is a schema error.
        let err = parse_decision(&decision_json("corrective", None)).unwrap_err();
        assert_eq!(err, SchemaValidationError::MissingField("target_stat"));

        // Unknown enumeration values are rejected, not defaulted.
        let err = parse_decision(&decision_json("epic", None)).unwrap_err();
        assert!(matches!(
            err,
            SchemaValidationError::InvalidValue {
                field: "content_type",
                ..
            }
        ));

        let err = parse_decision(r#"{"needs_content": true}"#).unwrap_err();
        assert_eq!(err, SchemaValidationError::MissingField("reasoning"));
    }

    #[test]
    fn test_parse_no_content_ignores_other_fields() {
        let decision =
            parse_decision(r#"{"needs_content": false, "reasoning": "busy", "content_type": "??"}"#)
                .unwrap();
        assert!(!decision.needs_content);
    }

    #[test]
    fn test_fallback_rule() {
        let config = DecisionConfig::default();
        let balanced = Character::new("Mira", StatBlock::new([12, 12, 12, 12, 12, 12]));
        let lopsided = Character::new("Tor", StatBlock::new([6, 14, 14, 14, 14, 14]));

        assert!(!fallback_decision(&balanced, 3, &config).needs_content);

        let side = fallback_decision(&balanced, 0, &config);
        assert_eq!(side.content_type, ContentType::Side);

        // Mean is 12.67, STR trails by 6.67.
        let corrective = fallback_decision(&lopsided, 1, &config);
        assert_eq!(corrective.content_type, ContentType::Corrective);
        assert_eq!(corrective.target_stat, Some(Stat::Strength));
        assert!(corrective.validate().is_ok());
    }

    #[test]
    fn test_fallback_gap_boundary() {
        let config = DecisionConfig::default();
        // Mean 11.0, INT at 6 trails by exactly 5.
        let character = Character::new("Ash", StatBlock::new([12, 12, 12, 6, 12, 12]));
        let decision = fallback_decision(&character, 0, &config);
        assert_eq!(decision.target_stat, Some(Stat::Intelligence));
    }

    #[test]
    fn test_expected_tone() {
        let corrective = Decision::corrective(Stat::Wisdom, Difficulty::Easy, "r");
        assert_eq!(corrective.expected_tone(), Tone::Hopeful);
        assert_eq!(
            corrective.with_tone(Tone::Somber).expected_tone(),
            Tone::Somber
        );
    }

    #[tokio::test]
    async fn test_decide_uses_provider_answer() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(decision_json("main", None)));
        let (decision, source) = coordinator(provider.clone())
            .decide_with_source(&sample_character(), 0)
            .await;

        assert_eq!(source, DecisionSource::Provider);
        assert_eq!(decision.content_type, ContentType::Main);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_decide_absorbs_failures() {
        let provider = Arc::new(
            ScriptedProvider::new().with_failure(GenerationProviderError::Network("down".into())),
        );
        let (decision, source) = coordinator(provider)
            .decide_with_source(&sample_character(), 0)
            .await;
        assert_eq!(source, DecisionSource::Rules);
        assert!(decision.validate().is_ok());

        let provider = Arc::new(ScriptedProvider::new().with_reply("not json at all"));
        let (_, source) = coordinator(provider)
            .decide_with_source(&sample_character(), 0)
            .await;
        assert_eq!(source, DecisionSource::Rules);
    }

    #[tokio::test]
    async fn test_ceiling_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(decision_json("main", None)));
        let decision = coordinator(provider.clone())
            .decide(&sample_character(), 3)
            .await;

        assert!(!decision.needs_content);
        assert_eq!(provider.call_count(), 0);
    }
}
