//! Three ordered validation tiers.
//!
//! 1. Input: is it worth spending provider cost on this request at all?
//! 2. Generation: does the content hold up on its own?
//! 3. Consistency: does it fit the character, their history and the canon?
//!
//! The pipeline holds no state beyond configuration; every tier is a function
//! of its inputs plus the Lorekeeper's judgement.

pub mod coherence;
pub mod heuristics;
pub mod input;
pub mod lorekeeper;

pub use lorekeeper::{LoreScorer, LoreVerdict, ProviderLorekeeper, RuleLorekeeper};

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::character::Character;
use crate::config::ValidationConfig;
use crate::content::GeneratedContent;
use crate::context::GenerationContext;
use crate::decision::Decision;
use crate::error::ConfigError;
use crate::lore::LoreBook;

/// A validation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Input = 1,
    Generation = 2,
    Consistency = 3,
}

impl Tier {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Input => "input",
            Tier::Generation => "generation",
            Tier::Consistency => "consistency",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier {} ({})", self.number(), self.name())
    }
}

/// What the caller should do with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    /// Not good enough, but one more attempt is worthwhile.
    Revisable,
    /// Unsalvageable.
    Reject,
}

/// One tier's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub tier: Tier,
    pub passed: bool,
    /// 0.0 to 1.0.
    pub score: f64,
    pub verdict: Verdict,
    pub issues: Vec<String>,
}

impl ValidationResult {
    pub fn new(tier: Tier, passed: bool, score: f64, verdict: Verdict, issues: Vec<String>) -> Self {
        Self {
            tier,
            passed,
            score: score.clamp(0.0, 1.0),
            verdict,
            issues,
        }
    }
}

/// Results of a full run, in tier order, ending at the first failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub results: Vec<ValidationResult>,
}

impl PipelineReport {
    /// All three tiers ran and passed.
    pub fn accepted(&self) -> bool {
        self.results.len() == 3 && self.results.iter().all(|r| r.passed)
    }

    /// The tier that stopped the run.
    pub fn failure(&self) -> Option<&ValidationResult> {
        self.results.iter().find(|r| !r.passed)
    }

    pub fn tier(&self, tier: Tier) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.tier == tier)
    }

    /// The score of the last tier that ran.
    pub fn final_score(&self) -> f64 {
        self.results.last().map(|r| r.score).unwrap_or(0.0)
    }

    pub fn issues(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.issues.iter().cloned())
            .collect()
    }
}

/// The three tiers plus their configuration.
pub struct ValidationPipeline {
    config: ValidationConfig,
    lore: Arc<LoreBook>,
    lorekeeper: Arc<dyn LoreScorer>,
    injection_patterns: Vec<Regex>,
}

impl ValidationPipeline {
    pub fn new(
        config: ValidationConfig,
        lore: Arc<LoreBook>,
        lorekeeper: Arc<dyn LoreScorer>,
    ) -> Result<Self, ConfigError> {
        let injection_patterns = config
            .injection_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "injection_patterns".to_string(),
                        value: pattern.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            lore,
            lorekeeper,
            injection_patterns,
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Tier 1. Runs before any generation call.
    pub fn validate_input(
        &self,
        character: &Character,
        decision: &Decision,
        context: &GenerationContext,
    ) -> ValidationResult {
        input::check_input(
            &self.config,
            &self.injection_patterns,
            character,
            decision,
            context,
        )
    }

    /// Tier 2. Pure function of the content.
    pub fn validate_content(&self, content: &GeneratedContent) -> ValidationResult {
        heuristics::evaluate(content, &self.config)
    }

    /// Tier 3.
    pub async fn validate_consistency(
        &self,
        content: &GeneratedContent,
        decision: &Decision,
        character: &Character,
        context: &GenerationContext,
    ) -> ValidationResult {
        let verdict = self.lorekeeper.score(content, &self.lore).await;
        coherence::evaluate(
            content,
            decision,
            character,
            context,
            &verdict,
            &self.config,
        )
    }

    /// Run all tiers in order, stopping at the first failure.
    pub async fn run_full_pipeline(
        &self,
        character: &Character,
        decision: &Decision,
        context: &GenerationContext,
        content: &GeneratedContent,
    ) -> PipelineReport {
        let mut report = PipelineReport::default();

        let input = self.validate_input(character, decision, context);
        let input_passed = input.passed;
        report.results.push(input);
        if !input_passed {
            debug!(tier = %Tier::Input, "validation stopped");
            return report;
        }

        let generation = self.validate_content(content);
        let generation_passed = generation.passed;
        report.results.push(generation);
        if !generation_passed {
            debug!(tier = %Tier::Generation, "validation stopped");
            return report;
        }

        report
            .results
            .push(self.validate_consistency(content, decision, character, context).await);
        report
    }

    /// Tiers 2 and 3 with no short-circuit, for content that is stored regardless.
    pub async fn score_unconditionally(
        &self,
        character: &Character,
        decision: &Decision,
        context: &GenerationContext,
        content: &GeneratedContent,
    ) -> PipelineReport {
        let generation = self.validate_content(content);
        let consistency = self
            .validate_consistency(content, decision, character, context)
            .await;
        PipelineReport {
            results: vec![generation, consistency],
        }
    }
}
