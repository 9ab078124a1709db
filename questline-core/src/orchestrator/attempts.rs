//! The two [`Attempt`] implementations the service drives.

use async_trait::async_trait;

use super::policy::{Assessment, Attempt};
use crate::character::Character;
use crate::config::ValidationConfig;
use crate::content::consequence::consequence_issues;
use crate::content::{
    Consequence, ConsequenceEngine, ContentError, GeneratedContent, QuestCreator, Revision,
};
use crate::context::GenerationContext;
use crate::decision::Decision;
use crate::store::PersistedQuest;
use crate::validation::{Tier, ValidationPipeline};

/// Quest generation judged by the full validation pipeline.
pub(crate) struct QuestAttempt<'a> {
    pub creator: &'a QuestCreator,
    pub pipeline: &'a ValidationPipeline,
    pub decision: &'a Decision,
    pub character: &'a Character,
    pub context: &'a GenerationContext,
}

#[async_trait]
impl Attempt for QuestAttempt<'_> {
    type Output = GeneratedContent;
    type Error = ContentError;

    async fn generate(
        &self,
        attempt: u32,
        previous: Option<&Assessment>,
    ) -> Result<GeneratedContent, ContentError> {
        let revision = previous.map(|p| Revision {
            attempt,
            notes: p.issues.clone(),
        });
        self.creator
            .generate(self.decision, self.character, self.context, revision.as_ref())
            .await
    }

    async fn assess(&self, content: &GeneratedContent) -> Assessment {
        let report = self
            .pipeline
            .run_full_pipeline(self.character, self.decision, self.context, content)
            .await;
        let issues = report.issues();

        match report.failure() {
            None => Assessment::accept(report.final_score(), issues),
            // Tier-2 only fails on Reject: unsalvageable, so no second attempt.
            Some(failure) if failure.tier == Tier::Generation => {
                Assessment::abandon(failure.score, issues)
            }
            Some(failure) if failure.tier == Tier::Consistency => {
                Assessment::retry(failure.score, issues)
            }
            Some(failure) => Assessment::abandon(failure.score, issues),
        }
    }

    fn fallback(&self) -> GeneratedContent {
        QuestCreator::fallback_template(self.decision, self.character)
    }

    async fn assess_fallback(&self, content: &GeneratedContent) -> Assessment {
        let report = self
            .pipeline
            .score_unconditionally(self.character, self.decision, self.context, content)
            .await;
        let score = report
            .tier(Tier::Consistency)
            .map(|r| r.score)
            .unwrap_or(0.0);
        Assessment::accept(score, report.issues())
    }
}

/// Consequence generation judged by the tier-2 text bounds.
pub(crate) struct ConsequenceAttempt<'a> {
    pub engine: &'a ConsequenceEngine,
    pub quest: &'a PersistedQuest,
    pub character: &'a Character,
    pub config: &'a ValidationConfig,
}

impl ConsequenceAttempt<'_> {
    fn judge(&self, consequence: &Consequence) -> (f64, Vec<String>) {
        let issues = consequence_issues(consequence, self.config);
        let score = (1.0 - self.config.tier2_penalty * issues.len() as f64).clamp(0.0, 1.0);
        (score, issues)
    }
}

#[async_trait]
impl Attempt for ConsequenceAttempt<'_> {
    type Output = Consequence;
    type Error = ContentError;

    async fn generate(
        &self,
        _attempt: u32,
        previous: Option<&Assessment>,
    ) -> Result<Consequence, ContentError> {
        let notes = previous.map(|p| p.issues.as_slice()).unwrap_or(&[]);
        self.engine
            .generate_with_notes(self.quest, self.character, notes)
            .await
    }

    async fn assess(&self, consequence: &Consequence) -> Assessment {
        let (score, issues) = self.judge(consequence);
        if issues.is_empty() {
            Assessment::accept(score, issues)
        } else {
            Assessment::retry(score, issues)
        }
    }

    fn fallback(&self) -> Consequence {
        ConsequenceEngine::fallback(self.quest, self.character)
    }

    async fn assess_fallback(&self, consequence: &Consequence) -> Assessment {
        let (score, issues) = self.judge(consequence);
        Assessment::accept(score, issues)
    }
}
