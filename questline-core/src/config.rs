//! Configuration for every pipeline stage.
//!
//! All thresholds are heuristics, not correctness guarantees, so each one
//! lives here rather than as a constant next to the code that reads it.

use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// Default model for generation calls.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration for the Generation Client and the requests built on it.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: usize,
    /// Temperature for decision requests (kept low: we want a stable answer).
    pub decision_temperature: f32,
    /// Temperature for the first content attempt.
    pub content_temperature: f32,
    /// Temperature for the regeneration attempt.
    pub retry_temperature: f32,
    /// Temperature for summaries and judgements.
    pub analysis_temperature: f32,
    /// Hard timeout on a single provider call.
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// USD per million input tokens.
    pub input_price_per_mtok: f64,
    /// USD per million output tokens.
    pub output_price_per_mtok: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1500,
            decision_temperature: 0.2,
            content_temperature: 0.8,
            retry_temperature: 0.6,
            analysis_temperature: 0.0,
            timeout: Duration::from_secs(45),
            cache_ttl: Duration::from_secs(15 * 60),
            cache_capacity: 256,
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
        }
    }
}

/// Configuration for the deterministic decision rule.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Open quests at or above this count mean no new content.
    pub max_active_quests: usize,
    /// How far the weakest stat must trail the mean to warrant corrective content.
    pub corrective_stat_gap: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_active_quests: 3,
            corrective_stat_gap: 5.0,
        }
    }
}

/// Weights blending the tier-3 sub-scores.
#[derive(Debug, Clone, Copy)]
pub struct Tier3Weights {
    pub coherence: f64,
    pub alignment: f64,
    pub tone: f64,
    pub lore: f64,
}

impl Tier3Weights {
    /// Use only the Lorekeeper score.
    pub fn lore_only() -> Self {
        Self {
            coherence: 0.0,
            alignment: 0.0,
            tone: 0.0,
            lore: 1.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.coherence + self.alignment + self.tone + self.lore
    }
}

impl Default for Tier3Weights {
    fn default() -> Self {
        Self {
            coherence: 0.2,
            alignment: 0.2,
            tone: 0.1,
            lore: 0.5,
        }
    }
}

/// Configuration for all three validation tiers.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Tier 1: upper bound on the estimated context size in tokens.
    pub max_context_tokens: usize,
    /// Tier 1: case-insensitive regular expressions flagging prompt injection.
    pub injection_patterns: Vec<String>,
    /// Tier 2: score at or above which content passes outright.
    pub tier2_pass: f64,
    /// Tier 2: score below which content is unsalvageable.
    pub tier2_floor: f64,
    /// Tier 2: score deducted per violation.
    pub tier2_penalty: f64,
    /// Tier 2: maximum share of repeated meaningful tokens.
    pub max_repetition_ratio: f64,
    /// Tier 2: stock phrases that make content generic.
    pub stock_phrases: Vec<String>,
    /// Tier 2: how many stock phrases are tolerated before flagging.
    pub max_stock_phrases: usize,
    pub title_chars: (usize, usize),
    pub description_chars: (usize, usize),
    pub objective_chars: (usize, usize),
    /// Tier 3: blended score must exceed this.
    pub consistency_threshold: f64,
    pub tier3_weights: Tier3Weights,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 3000,
            injection_patterns: vec![
                r"ignore\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts?)".to_string(),
                r"disregard\s+(the\s+)?(system|previous)".to_string(),
                r"you\s+are\s+now\s+".to_string(),
                r"(^|\n)\s*(system|assistant)\s*:".to_string(),
                r"<\s*/?\s*(script|system)\b".to_string(),
                r"\{\{.*\}\}".to_string(),
                r"```".to_string(),
            ],
            tier2_pass: 0.8,
            tier2_floor: 0.5,
            tier2_penalty: 0.15,
            max_repetition_ratio: 0.4,
            stock_phrases: [
                "embark on a journey",
                "embark on an epic",
                "a mysterious stranger",
                "an ancient evil",
                "save the world",
                "in a land far away",
                "unlock your potential",
                "push your limits",
                "test your mettle",
                "the fate of the world",
                "an epic adventure",
                "a quest of legendary proportions",
                "prove your worth",
                "face your fears",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_stock_phrases: 1,
            title_chars: (4, 80),
            description_chars: (40, 1200),
            objective_chars: (10, 200),
            consistency_threshold: 0.85,
            tier3_weights: Tier3Weights::default(),
        }
    }
}

/// Configuration for the memory tiers and the compression job.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Fewer eligible events than this and compression is a no-op.
    pub min_batch_size: usize,
    /// At most this many events fold into one episode.
    pub max_batch_size: usize,
    /// Events older than this are eligible for compression.
    pub compression_age: chrono::Duration,
    pub summary_word_cap: usize,
    /// Upper bound on records handed to context assembly.
    pub retrieval_limit: usize,
    /// Working events considered as retrieval candidates.
    pub working_candidates: usize,
    /// Pause between characters in a batch run.
    pub inter_character_delay: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 10,
            max_batch_size: 50,
            compression_age: chrono::Duration::days(7),
            summary_word_cap: 250,
            retrieval_limit: 10,
            working_candidates: 50,
            inter_character_delay: Duration::from_secs(2),
        }
    }
}

impl MemoryConfig {
    /// Reject settings under which an episode could fold an empty or fresh batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_batch_size == 0 {
            return Err(invalid("min_batch_size", self.min_batch_size));
        }
        if self.max_batch_size < self.min_batch_size {
            return Err(invalid("max_batch_size", self.max_batch_size));
        }
        if self.compression_age <= chrono::Duration::zero() {
            return Err(invalid("compression_age", self.compression_age));
        }
        Ok(())
    }
}

/// Configuration for persisted quest lifecycles.
#[derive(Debug, Clone)]
pub struct QuestConfig {
    /// Quests never started within this horizon expire.
    pub expiry: chrono::Duration,
    /// Characters of lore handed to generation.
    pub lore_excerpt_chars: usize,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            expiry: chrono::Duration::hours(72),
            lore_excerpt_chars: 1200,
        }
    }
}

impl QuestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry <= chrono::Duration::zero() {
            return Err(invalid("expiry", self.expiry));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct QuestlineConfig {
    pub generation: GenerationConfig,
    pub decision: DecisionConfig,
    pub validation: ValidationConfig,
    pub memory: MemoryConfig,
    pub quest: QuestConfig,
}

impl QuestlineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `QUESTLINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(model) = lookup("QUESTLINE_MODEL") {
            config.generation.model = model;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "QUESTLINE_MAX_TOKENS")? {
            config.generation.max_tokens = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "QUESTLINE_TIMEOUT_SECS")? {
            config.generation.timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "QUESTLINE_CACHE_TTL_SECS")? {
            config.generation.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "QUESTLINE_MAX_ACTIVE_QUESTS")? {
            config.decision.max_active_quests = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "QUESTLINE_CONSISTENCY_THRESHOLD")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::InvalidValue {
                    key: "QUESTLINE_CONSISTENCY_THRESHOLD".to_string(),
                    value: v.to_string(),
                });
            }
            config.validation.consistency_threshold = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "QUESTLINE_MIN_BATCH")? {
            config.memory.min_batch_size = v;
        }
        if let Some(v) = parse_var::<i64>(&lookup, "QUESTLINE_COMPRESSION_AGE_HOURS")? {
            config.memory.compression_age = chrono::Duration::hours(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "QUESTLINE_COMPRESSION_DELAY_MS")? {
            config.memory.inter_character_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<i64>(&lookup, "QUESTLINE_QUEST_EXPIRY_HOURS")? {
            config.quest.expiry = chrono::Duration::hours(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the individual sections rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.memory.validate()?;
        self.quest.validate()
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_decision(mut self, decision: DecisionConfig) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_quest(mut self, quest: QuestConfig) -> Self {
        self.quest = quest;
        self
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = QuestlineConfig::default();
        assert_eq!(config.validation.consistency_threshold, 0.85);
        assert_eq!(config.decision.max_active_quests, 3);
        assert_eq!(config.memory.summary_word_cap, 250);
        assert!((config.validation.tier3_weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_env_overlay() {
        let config = QuestlineConfig::from_lookup(lookup_from(&[
            ("QUESTLINE_MODEL", "claude-3-5-haiku-20241022"),
            ("QUESTLINE_MIN_BATCH", "4"),
            ("QUESTLINE_CONSISTENCY_THRESHOLD", "0.7"),
            ("QUESTLINE_COMPRESSION_DELAY_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.generation.model, "claude-3-5-haiku-20241022");
        assert_eq!(config.memory.min_batch_size, 4);
        assert_eq!(config.validation.consistency_threshold, 0.7);
        assert_eq!(config.memory.inter_character_delay, Duration::ZERO);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = QuestlineConfig::from_lookup(lookup_from(&[("QUESTLINE_MIN_BATCH", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "QUESTLINE_MIN_BATCH"));

        assert!(QuestlineConfig::from_lookup(lookup_from(&[(
            "QUESTLINE_CONSISTENCY_THRESHOLD",
            "1.5"
        )]))
        .is_err());
    }

    #[test]
    fn test_batch_and_horizon_bounds() {
        let rejected = [
            ("QUESTLINE_MIN_BATCH", "0", "min_batch_size"),
            ("QUESTLINE_MIN_BATCH", "60", "max_batch_size"),
            ("QUESTLINE_COMPRESSION_AGE_HOURS", "-48", "compression_age"),
            ("QUESTLINE_COMPRESSION_AGE_HOURS", "0", "compression_age"),
            ("QUESTLINE_QUEST_EXPIRY_HOURS", "-1", "expiry"),
        ];
        for (var, value, field) in rejected {
            let err = QuestlineConfig::from_lookup(lookup_from(&[(var, value)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == field),
                "{var}={value} gave {err}"
            );
        }

        let config = QuestlineConfig::from_lookup(lookup_from(&[
            ("QUESTLINE_MIN_BATCH", "50"),
            ("QUESTLINE_COMPRESSION_AGE_HOURS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.memory.min_batch_size, config.memory.max_batch_size);
    }
}
