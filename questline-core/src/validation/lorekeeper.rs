//! The Lorekeeper: scores content against canon.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::GeneratedContent;
use crate::error::ReplyError;
use crate::generation::{parse_payload, ChatMessage, GenerationClient};
use crate::lore::LoreBook;

/// Minimum score for content to count as canon-consistent.
pub const LORE_PASS_SCORE: u8 = 70;

const FORBIDDEN_PENALTY: u8 = 35;
const ANACHRONISM_PENALTY: u8 = 20;
const UNGROUNDED_PENALTY: u8 = 10;

/// The Lorekeeper's judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreVerdict {
    /// 0 to 100.
    pub score: u8,
    pub passed: bool,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
}

impl LoreVerdict {
    pub fn new(score: u8, violations: Vec<String>, suggestions: Vec<String>) -> Self {
        let score = score.min(100);
        Self {
            score,
            passed: score >= LORE_PASS_SCORE && violations.is_empty(),
            violations,
            suggestions,
        }
    }
}

/// Scores generated content against a lore book.
///
/// Scoring never fails: implementations that depend on a provider degrade to
/// rules rather than surfacing an error.
#[async_trait]
pub trait LoreScorer: Send + Sync {
    async fn score(&self, content: &GeneratedContent, lore: &LoreBook) -> LoreVerdict;
}

/// Deterministic canon checks.
#[derive(Debug, Clone)]
pub struct RuleLorekeeper {
    /// Terms out of place in the setting's era, on top of the lore book's forbidden terms.
    pub anachronisms: Vec<String>,
}

impl Default for RuleLorekeeper {
    fn default() -> Self {
        Self {
            anachronisms: [
                "pistol", "rifle", "cannon", "telephone", "radio", "laptop", "internet", "robot",
                "engine", "train station",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl RuleLorekeeper {
    pub fn evaluate(&self, content: &GeneratedContent, lore: &LoreBook) -> LoreVerdict {
        let text = normalize(&content.full_text());
        let mut penalty: u32 = 0;
        let mut violations = Vec::new();
        let mut suggestions = Vec::new();

        for term in &lore.forbidden_terms {
            if mentions(&text, term) {
                penalty += u32::from(FORBIDDEN_PENALTY);
                violations.push(format!("mentions forbidden term '{term}'"));
            }
        }
        for term in &self.anachronisms {
            if mentions(&text, term) {
                penalty += u32::from(ANACHRONISM_PENALTY);
                violations.push(format!("anachronism '{term}'"));
            }
        }

        let grounded = lore.names().any(|name| mentions(&text, canonical_core(name)));
        if !grounded && !lore.entries.is_empty() {
            penalty += u32::from(UNGROUNDED_PENALTY);
            let examples = lore.names().take(3).collect::<Vec<_>>().join(", ");
            suggestions.push(format!("anchor the quest in canon, e.g. {examples}"));
        }

        let score = 100u32.saturating_sub(penalty) as u8;
        LoreVerdict::new(score, violations, suggestions)
    }
}

#[async_trait]
impl LoreScorer for RuleLorekeeper {
    async fn score(&self, content: &GeneratedContent, lore: &LoreBook) -> LoreVerdict {
        self.evaluate(content, lore)
    }
}

/// Asks the provider to judge canon, falling back to rules on any failure.
pub struct ProviderLorekeeper {
    client: Arc<GenerationClient>,
    fallback: RuleLorekeeper,
    excerpt_chars: usize,
}

impl ProviderLorekeeper {
    pub fn new(client: Arc<GenerationClient>) -> Self {
        Self {
            client,
            fallback: RuleLorekeeper::default(),
            excerpt_chars: 2000,
        }
    }

    pub fn with_fallback(mut self, fallback: RuleLorekeeper) -> Self {
        self.fallback = fallback;
        self
    }
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    score: f64,
    #[serde(default)]
    violations: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Parse a provider verdict. Scores outside 0-100 are clamped.
pub fn parse_verdict(text: &str) -> Result<LoreVerdict, crate::error::SchemaValidationError> {
    let payload: VerdictPayload = parse_payload(text)?;
    if !payload.score.is_finite() {
        return Err(crate::error::SchemaValidationError::InvalidValue {
            field: "score",
            reason: "not a number".to_string(),
        });
    }
    Ok(LoreVerdict::new(
        payload.score.round().clamp(0.0, 100.0) as u8,
        payload.violations,
        payload.suggestions,
    ))
}

#[async_trait]
impl LoreScorer for ProviderLorekeeper {
    async fn score(&self, content: &GeneratedContent, lore: &LoreBook) -> LoreVerdict {
        let request = self
            .client
            .request(LOREKEEPER_SYSTEM_PROMPT)
            .with_temperature(self.client.config().analysis_temperature)
            .with_message(ChatMessage::user(format!(
                "{}\n## Content\nTitle: {}\n{}\n\nReturn JSON: {{\"score\": 0-100, \
                 \"violations\": [string], \"suggestions\": [string]}}",
                lore.excerpt(self.excerpt_chars),
                content.title,
                content.full_text(),
            )));

        let outcome = self
            .client
            .generate_parsed(&request, |text| {
                parse_verdict(text).map_err(ReplyError::from)
            })
            .await
            .map(|(verdict, _)| verdict)
            .map_err(|e| e.to_string());

        match outcome {
            Ok(verdict) => {
                debug!(score = verdict.score, passed = verdict.passed, "lore verdict");
                verdict
            }
            Err(reason) => {
                warn!(reason = %reason, "lorekeeper unavailable, scoring by rules");
                self.fallback.evaluate(content, lore)
            }
        }
    }
}

const LOREKEEPER_SYSTEM_PROMPT: &str = "You are the keeper of canon for a fantasy setting. \
Score how well the content fits the canon below, listing contradictions as violations. \
Respond with a single JSON object and nothing else.";

/// Lowercase, punctuation to spaces, padded so whole words match as ` word `.
fn normalize(text: &str) -> String {
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {words} ")
}

/// Whole-word (or whole-phrase) match, allowing a plural `s`.
fn mentions(normalized: &str, term: &str) -> bool {
    let term = normalize(term);
    let term = term.trim();
    if term.is_empty() {
        return false;
    }
    normalized.contains(&format!(" {term} ")) || normalized.contains(&format!(" {term}s "))
}

/// "The Ashen Road" is mentioned as "the Ashen Road" or just "Ashen Road".
fn canonical_core(name: &str) -> &str {
    name.strip_prefix("The ").unwrap_or(name)
}
