//! Relevance ranking across memory tiers.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;

use super::record::{MemoryRecord, ScoredMemory};
use crate::error::PersistenceError;

/// Ranks memory records against a query.
///
/// The default implementation is keyword overlap; a vector-similarity index
/// can stand in as long as it returns a ranked list.
#[async_trait]
pub trait RelevanceIndex: Send + Sync {
    /// Return at most `k` candidates, most relevant first.
    async fn rank(
        &self,
        query: &str,
        candidates: Vec<MemoryRecord>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>, PersistenceError>;
}

/// Token-overlap ranking blended with salience and recency.
#[derive(Debug, Clone)]
pub struct KeywordRelevance {
    pub overlap_weight: f64,
    pub salience_weight: f64,
    pub recency_weight: f64,
}

impl Default for KeywordRelevance {
    fn default() -> Self {
        Self {
            overlap_weight: 0.6,
            salience_weight: 0.25,
            recency_weight: 0.15,
        }
    }
}

impl KeywordRelevance {
    /// Score one record. Pure apart from the current time.
    pub fn score(&self, query_tokens: &HashSet<String>, record: &MemoryRecord) -> f64 {
        let overlap = if query_tokens.is_empty() {
            0.0
        } else {
            let tokens = tokenize(&record.text());
            query_tokens.intersection(&tokens).count() as f64 / query_tokens.len() as f64
        };

        let salience = match record {
            MemoryRecord::Fact(f) => f.importance,
            MemoryRecord::Episode(_) => 0.7,
            MemoryRecord::Working(_) => 0.4,
        };

        let age_days = (Utc::now() - record.timestamp()).num_hours().max(0) as f64 / 24.0;
        let recency = 1.0 / (1.0 + age_days);

        self.overlap_weight * overlap + self.salience_weight * salience + self.recency_weight * recency
    }
}

#[async_trait]
impl RelevanceIndex for KeywordRelevance {
    async fn rank(
        &self,
        query: &str,
        candidates: Vec<MemoryRecord>,
        k: usize,
    ) -> Result<Vec<ScoredMemory>, PersistenceError> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|record| ScoredMemory {
                score: self.score(&query_tokens, &record),
                record,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.timestamp().cmp(&a.record.timestamp()))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "was", "were", "are", "has",
    "have", "had", "her", "his", "their", "them", "they", "you", "your", "who", "what", "when",
    "then", "than", "but", "not", "all", "any", "its", "our", "out", "over", "some", "will",
    "must", "before", "after", "each", "one",
];

/// Meaningful tokens in order, repeats kept: lowercased alphanumeric runs of three
/// or more characters, minus stopwords.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// The distinct [`tokens`] of `text`.
pub fn tokenize(text: &str) -> HashSet<String> {
    tokens(text).collect()
}
