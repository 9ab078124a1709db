//! Tier 3: content against its context.

use std::collections::HashSet;

use super::lorekeeper::LoreVerdict;
use super::{Tier, ValidationResult, Verdict};
use crate::character::Character;
use crate::config::{Tier3Weights, ValidationConfig};
use crate::content::GeneratedContent;
use crate::context::GenerationContext;
use crate::decision::{ContentType, Decision, Tone};
use crate::memory::relevance::tokenize;

/// How many retrieved memories content must build on for full marks.
const MEMORIES_FOR_FULL_COHERENCE: usize = 3;

/// Shared tokens needed before a memory counts as referenced.
const MIN_SHARED_TOKENS: usize = 2;

/// Sub-scores feeding the tier-3 blend, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsistencyScores {
    pub coherence: f64,
    pub alignment: f64,
    pub tone: f64,
    /// Lorekeeper score scaled from 0-100.
    pub lore: f64,
}

impl ConsistencyScores {
    pub fn blend(&self, weights: &Tier3Weights) -> f64 {
        let total = weights.total();
        if total <= 0.0 {
            return self.lore;
        }
        (weights.coherence * self.coherence
            + weights.alignment * self.alignment
            + weights.tone * self.tone
            + weights.lore * self.lore)
            / total
    }
}

/// Does the content build on retrieved memory?
///
/// Without memory there is nothing to contradict, so the score is neutral-high.
pub fn memory_coherence(content: &GeneratedContent, context: &GenerationContext) -> f64 {
    if context.memories.is_empty() {
        return 1.0;
    }

    let name_tokens = tokenize(&context.character.name);
    let content_tokens: HashSet<String> = tokenize(&content.full_text())
        .difference(&name_tokens)
        .cloned()
        .collect();

    let referenced = context
        .memories
        .iter()
        .filter(|m| tokenize(&m.text).intersection(&content_tokens).count() >= MIN_SHARED_TOKENS)
        .count();

    let needed = context.memories.len().min(MEMORIES_FOR_FULL_COHERENCE);
    (referenced as f64 / needed as f64).min(1.0)
}

/// Share of objectives rewarding the right stats.
///
/// Corrective content should reward the target stat; anything else should
/// play to the character's three strongest stats.
pub fn stat_alignment(content: &GeneratedContent, decision: &Decision, character: &Character) -> f64 {
    if content.objectives.is_empty() {
        return 0.0;
    }

    let wanted = match (decision.content_type, decision.target_stat) {
        (ContentType::Corrective, Some(stat)) => vec![stat],
        _ => character.stats.strongest(3),
    };
    if wanted.is_empty() {
        return 1.0;
    }

    let aligned = content
        .objectives
        .iter()
        .filter(|o| wanted.contains(&o.reward_stat))
        .count();
    aligned as f64 / content.objectives.len() as f64
}

/// How strongly the text reads in the expected tone versus any other.
pub fn tone_match(content: &GeneratedContent, expected: Tone) -> f64 {
    let words: Vec<String> = content
        .full_text()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let hits = |tone: Tone| {
        words
            .iter()
            .filter(|w| tone.lexicon().iter().any(|stem| w.starts_with(stem)))
            .count()
    };

    let expected_hits = hits(expected);
    let strongest_other = Tone::ALL
        .into_iter()
        .filter(|t| *t != expected)
        .map(hits)
        .max()
        .unwrap_or(0);

    if expected_hits == 0 && strongest_other == 0 {
        return 0.5;
    }
    expected_hits as f64 / (expected_hits + strongest_other) as f64
}

pub(crate) fn evaluate(
    content: &GeneratedContent,
    decision: &Decision,
    character: &Character,
    context: &GenerationContext,
    lore: &LoreVerdict,
    config: &ValidationConfig,
) -> ValidationResult {
    let scores = ConsistencyScores {
        coherence: memory_coherence(content, context),
        alignment: stat_alignment(content, decision, character),
        tone: tone_match(content, decision.expected_tone()),
        lore: f64::from(lore.score.min(100)) / 100.0,
    };
    let score = scores.blend(&config.tier3_weights);

    let mut issues = Vec::new();
    if scores.coherence < 0.5 {
        issues.push("does not build on the character's recent history".to_string());
    }
    if scores.alignment < 0.5 {
        match decision.target_stat {
            Some(stat) if decision.content_type == ContentType::Corrective => {
                issues.push(format!("objectives should reward {}", stat.name()))
            }
            _ => issues.push("rewards ignore the character's strengths".to_string()),
        }
    }
    if scores.tone < 0.5 {
        issues.push(format!(
            "tone does not read as {}",
            decision.expected_tone().name()
        ));
    }
    issues.extend(lore.violations.iter().map(|v| format!("lore: {v}")));
    issues.extend(lore.suggestions.iter().map(|s| format!("lore suggestion: {s}")));

    let passed = score > config.consistency_threshold;
    if !passed && issues.is_empty() {
        issues.push(format!(
            "consistency score {:.2} does not clear {:.2}",
            score, config.consistency_threshold
        ));
    }
    ValidationResult::new(
        Tier::Consistency,
        passed,
        score,
        if passed {
            Verdict::Pass
        } else {
            Verdict::Revisable
        },
        issues,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Stat;
    use crate::content::{parse_quest, Objective};
    use crate::context::MemorySnippet;
    use crate::decision::Difficulty;
    use crate::lore::LoreBook;
    use crate::memory::MemoryTier;
    use crate::testing::{quest_json, sample_character};

    fn content() -> GeneratedContent {
        parse_quest(&quest_json("Stones of the Quarry", 2, "STR")).unwrap()
    }

    #[test]
    fn test_alignment_for_corrective() {
        let character = sample_character();
        let decision = Decision::corrective(Stat::Strength, Difficulty::Easy, "r");
        assert_eq!(stat_alignment(&content(), &decision, &character), 1.0);

        let mut mixed = content();
        mixed.objectives[1] = Objective::new("Charm the quartermaster", Stat::Charisma, 30);
        assert_eq!(stat_alignment(&mixed, &decision, &character), 0.5);
    }

    #[test]
    fn test_alignment_plays_to_strengths() {
        // sample_character's strongest are CHA, WIS, DEX.
        let character = sample_character();
        let decision = Decision::side("errand", "r");
        let mut quest = content();
        quest.objectives = vec![
            Objective::new("Talk the guards down", Stat::Charisma, 30),
            Objective::new("Lift the fallen cart", Stat::Strength, 30),
        ];
        assert_eq!(stat_alignment(&quest, &decision, &character), 0.5);
    }

    #[test]
    fn test_tone_match() {
        let mut quest = content();
        quest.description = "Steady practice will help you grow; hope and progress await.".into();
        assert!(tone_match(&quest, Tone::Hopeful) > 0.9);
        assert!(tone_match(&quest, Tone::Somber) < 0.1);

        quest.title = "Plain".into();
        quest.description = "Walk north.".into();
        quest.objectives = vec![Objective::new("Walk north", Stat::Dexterity, 10)];
        assert_eq!(tone_match(&quest, Tone::Heroic), 0.5);
    }

    #[test]
    fn test_memory_coherence() {
        let character = sample_character();
        let mut context = GenerationContext::without_memory(&character, &LoreBook::default(), 200);
        assert_eq!(memory_coherence(&content(), &context), 1.0);

        context.memories = vec![
            MemorySnippet {
                tier: MemoryTier::Working,
                text: "Mira hauled quarry stones for the mason".into(),
                score: 0.9,
            },
            MemorySnippet {
                tier: MemoryTier::Working,
                text: "Mira lost at cards in the tavern".into(),
                score: 0.5,
            },
        ];
        assert_eq!(memory_coherence(&content(), &context), 0.5);
    }

    #[test]
    fn test_low_score_always_explains_itself() {
        let character = sample_character();
        let decision = Decision::corrective(Stat::Strength, Difficulty::Easy, "r");
        let context = GenerationContext::without_memory(&character, &LoreBook::default(), 200);
        let config = ValidationConfig {
            tier3_weights: Tier3Weights::lore_only(),
            ..ValidationConfig::default()
        };

        let verdict = LoreVerdict::new(55, Vec::new(), Vec::new());
        let result = evaluate(&content(), &decision, &character, &context, &verdict, &config);
        assert!(!result.passed);
        assert_eq!(result.verdict, Verdict::Revisable);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].contains("0.55"));

        let verdict = LoreVerdict::new(90, Vec::new(), Vec::new());
        let result = evaluate(&content(), &decision, &character, &context, &verdict, &config);
        assert!(result.passed);
    }

    #[test]
    fn test_blend_weights() {
        let scores = ConsistencyScores {
            coherence: 1.0,
            alignment: 1.0,
            tone: 0.0,
            lore: 0.5,
        };
        assert!((scores.blend(&Tier3Weights::lore_only()) - 0.5).abs() < 1e-9);
        // 0.2 + 0.2 + 0.0 + 0.25
        assert!((scores.blend(&Tier3Weights::default()) - 0.65).abs() < 1e-9);
    }
}
