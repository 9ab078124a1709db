//! The batch compression job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::manager::MemoryManager;
use super::record::Episode;
use crate::character::CharacterId;

/// What happened to one character in a batch run.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    Compressed(Episode),
    /// Fewer eligible events than the minimum batch.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterCompression {
    pub character_id: CharacterId,
    pub outcome: CompressionOutcome,
}

/// Per-character results of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressionReport {
    pub results: Vec<CharacterCompression>,
}

impl CompressionReport {
    /// Episodes produced by the run. Failures contribute nothing.
    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.results.iter().filter_map(|r| match &r.outcome {
            CompressionOutcome::Compressed(episode) => Some(episode),
            _ => None,
        })
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, CompressionOutcome::Failed(_)))
            .count()
    }
}

/// Compresses every eligible character, one at a time.
pub struct CompressionJob {
    memory: Arc<MemoryManager>,
    delay: Duration,
}

impl CompressionJob {
    /// A job using the manager's configured inter-character delay.
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        let delay = memory.config().inter_character_delay;
        Self { memory, delay }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Compress all characters that have eligible events.
    pub async fn run(&self, now: DateTime<Utc>) -> CompressionReport {
        let characters = self.memory.eligible_characters(now).await;
        self.run_for(&characters, now).await
    }

    /// Compress the given characters sequentially, continuing past failures.
    pub async fn run_for(&self, characters: &[CharacterId], now: DateTime<Utc>) -> CompressionReport {
        let mut report = CompressionReport::default();

        for (i, character_id) in characters.iter().copied().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = match self.memory.compress(character_id, now).await {
                Ok(Some(episode)) => CompressionOutcome::Compressed(episode),
                Ok(None) => CompressionOutcome::Skipped,
                Err(e) => {
                    error!(character_id = %character_id, error = %e, "compression failed");
                    CompressionOutcome::Failed(e.to_string())
                }
            };
            report.results.push(CharacterCompression {
                character_id,
                outcome,
            });
        }

        info!(
            characters = report.results.len(),
            episodes = report.episodes().count(),
            failed = report.failed(),
            "compression batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory::{EventType, KeywordRelevance, NewEvent, Summarizer};
    use crate::store::{FaultPoint, Store};

    async fn seed(memory: &MemoryManager, id: CharacterId, n: usize) {
        let old = Utc::now() - chrono::Duration::days(10);
        for i in 0..n {
            memory
                .append_event(
                    id,
                    NewEvent::new(EventType::Social, format!("chat {i}"))
                        .at(old + chrono::Duration::seconds(i as i64)),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let store = Arc::new(Store::new());
        let memory = Arc::new(MemoryManager::new(
            store.clone(),
            Summarizer::rules_only(250),
            Arc::new(KeywordRelevance::default()),
            MemoryConfig::default(),
        ));
        let a = CharacterId::new();
        let b = CharacterId::new();
        let c = CharacterId::new();
        seed(&memory, a, 10).await;
        seed(&memory, b, 10).await;
        seed(&memory, c, 3).await;

        store.inject_fault(FaultPoint::InsertEpisode);
        let report = CompressionJob::new(memory)
            .with_delay(Duration::ZERO)
            .run(Utc::now())
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.episodes().count(), 1);
        let skipped = report
            .results
            .iter()
            .find(|r| r.character_id == c)
            .map(|r| r.outcome.clone());
        assert_eq!(skipped, Some(CompressionOutcome::Skipped));
    }
}
