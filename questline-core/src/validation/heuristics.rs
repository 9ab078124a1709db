//! Tier 2: content heuristics.
//!
//! Every function here is pure: same content in, same score out.

use std::collections::HashMap;

use super::{Tier, ValidationResult, Verdict};
use crate::config::ValidationConfig;
use crate::content::quest::{MAX_OBJECTIVES, MIN_OBJECTIVES};
use crate::content::GeneratedContent;
use crate::memory::relevance::tokens as meaningful_tokens;

/// Share of meaningful tokens that repeat an earlier token, in [0, 1].
pub fn repetition_ratio(content: &GeneratedContent) -> f64 {
    let tokens: Vec<String> = meaningful_tokens(&content.full_text()).collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *seen.entry(token.as_str()).or_insert(0) += 1;
    }
    let repeats: usize = seen.values().map(|n| n - 1).sum();
    repeats as f64 / tokens.len() as f64
}

/// `1 - repetition_ratio`.
pub fn repetition_score(content: &GeneratedContent) -> f64 {
    1.0 - repetition_ratio(content)
}

/// Stock phrases present in the content, case-insensitively.
pub fn stock_phrase_hits(content: &GeneratedContent, phrases: &[String]) -> Vec<String> {
    let text = content.full_text().to_lowercase();
    phrases
        .iter()
        .filter(|p| text.contains(&p.to_lowercase()))
        .cloned()
        .collect()
}

/// 1.0 with no stock phrases, falling as they accumulate.
pub fn genericity_score(content: &GeneratedContent, phrases: &[String]) -> f64 {
    1.0 / (1.0 + stock_phrase_hits(content, phrases).len() as f64)
}

/// Structural problems: objective count and required per-objective fields.
pub fn structure_issues(content: &GeneratedContent) -> Vec<String> {
    let mut issues = Vec::new();
    if content.title.trim().is_empty() {
        issues.push("missing title".to_string());
    }
    if content.description.trim().is_empty() {
        issues.push("missing description".to_string());
    }
    let count = content.objectives.len();
    if !(MIN_OBJECTIVES..=MAX_OBJECTIVES).contains(&count) {
        issues.push(format!(
            "{count} objectives (expected {MIN_OBJECTIVES}-{MAX_OBJECTIVES})"
        ));
    }
    for (i, objective) in content.objectives.iter().enumerate() {
        if objective.description.trim().is_empty() {
            issues.push(format!("objective {} has no description", i + 1));
        }
        if objective.reward_xp == 0 {
            issues.push(format!("objective {} has no reward", i + 1));
        }
    }
    issues
}

/// Fraction of structural checks that pass, in [0, 1].
pub fn structure_score(content: &GeneratedContent) -> f64 {
    // title, description, count, plus two per objective
    let checks = 3 + content.objectives.len() * 2;
    let failed = structure_issues(content).len().min(checks);
    1.0 - failed as f64 / checks as f64
}

/// Text fields outside their configured character bounds.
pub fn length_issues(content: &GeneratedContent, config: &ValidationConfig) -> Vec<String> {
    let mut issues = Vec::new();
    let mut check = |label: String, text: &str, (min, max): (usize, usize)| {
        let len = text.trim().chars().count();
        if len < min {
            issues.push(format!("{label} is too short ({len} < {min} chars)"));
        } else if len > max {
            issues.push(format!("{label} is too long ({len} > {max} chars)"));
        }
    };

    check("title".to_string(), &content.title, config.title_chars);
    check(
        "description".to_string(),
        &content.description,
        config.description_chars,
    );
    for (i, objective) in content.objectives.iter().enumerate() {
        check(
            format!("objective {}", i + 1),
            &objective.description,
            config.objective_chars,
        );
    }
    issues
}

/// Run every heuristic and fold the violations into one tier-2 result.
///
/// The score drops by the configured penalty per violation.
pub fn evaluate(content: &GeneratedContent, config: &ValidationConfig) -> ValidationResult {
    let mut issues = Vec::new();

    let ratio = repetition_ratio(content);
    if ratio > config.max_repetition_ratio {
        issues.push(format!(
            "repetitive wording ({:.0}% repeated tokens)",
            ratio * 100.0
        ));
    }

    let hits = stock_phrase_hits(content, &config.stock_phrases);
    if hits.len() > config.max_stock_phrases {
        issues.push(format!("generic phrasing: {}", hits.join(", ")));
    }

    issues.extend(length_issues(content, config));
    issues.extend(structure_issues(content));

    let score = (1.0 - config.tier2_penalty * issues.len() as f64).clamp(0.0, 1.0);
    let verdict = if score >= config.tier2_pass {
        Verdict::Pass
    } else if score >= config.tier2_floor {
        Verdict::Revisable
    } else {
        Verdict::Reject
    };

    ValidationResult::new(
        Tier::Generation,
        verdict != Verdict::Reject,
        score,
        verdict,
        issues,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Stat;
    use crate::content::{parse_quest, Objective};
    use crate::testing::quest_json;

    fn good() -> GeneratedContent {
        parse_quest(&quest_json("Stones of the Quarry", 2, "STR")).unwrap()
    }

    #[test]
    fn test_clean_content_passes() {
        let result = evaluate(&good(), &ValidationConfig::default());
        assert_eq!(result.verdict, Verdict::Pass, "{:?}", result.issues);
        assert!(result.issues.is_empty());
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_sub_scores_are_pure() {
        let content = good();
        let phrases = ValidationConfig::default().stock_phrases;
        assert_eq!(repetition_score(&content), repetition_score(&content));
        assert_eq!(
            genericity_score(&content, &phrases),
            genericity_score(&content, &phrases)
        );
        assert_eq!(structure_score(&content), structure_score(&content));
        assert_eq!(structure_score(&content), 1.0);
    }

    #[test]
    fn test_repetition_detected() {
        let mut content = good();
        content.description = vec!["stone"; 30].join(" ");
        assert!(repetition_ratio(&content) > 0.4);
        let result = evaluate(&content, &ValidationConfig::default());
        assert!(result.issues.iter().any(|i| i.contains("repetitive")));
    }

    #[test]
    fn test_filler_words_never_count_as_repetition() {
        let mut content = good();
        content.description = "Each one must go before the rest, and each one after. \
                               Cut blocks near the quarry."
            .to_string();
        let filler: Vec<String> = ["each", "one", "must", "before", "after"]
            .iter()
            .map(|w| w.to_string())
            .collect();
        let shared = crate::memory::relevance::tokenize(&content.description);
        assert!(filler.iter().all(|w| !shared.contains(w)));

        let counted: Vec<String> = meaningful_tokens(&content.description).collect();
        assert!(filler.iter().all(|w| !counted.contains(w)));
        assert!(counted.contains(&"quarry".to_string()));
    }

    #[test]
    fn test_stock_phrases_degrade_to_revisable() {
        let mut content = good();
        content.description = format!(
            "{} Embark on a journey to save the world and prove your worth.",
            content.description
        );
        let result = evaluate(&content, &ValidationConfig::default());
        // One violation: 0.85 still passes.
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(genericity_score(&content, &ValidationConfig::default().stock_phrases), 0.25);

        content.title = "Go".into();
        let result = evaluate(&content, &ValidationConfig::default());
        assert_eq!(result.verdict, Verdict::Revisable);
        assert!(result.passed);
    }

    #[test]
    fn test_many_violations_reject() {
        let content = GeneratedContent {
            title: "".into(),
            description: "short".into(),
            objectives: vec![Objective::new("", Stat::Strength, 0)],
            world_effects: vec![],
            metadata: Default::default(),
        };
        let result = evaluate(&content, &ValidationConfig::default());
        assert_eq!(result.verdict, Verdict::Reject);
        assert!(!result.passed);
        assert!(structure_score(&content) < 1.0);
    }
}
