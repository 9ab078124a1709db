//! Bounded retry with a deterministic fallback.
//!
//! The policy owns the control flow; an [`Attempt`] supplies generation,
//! assessment and the fallback. Quest and consequence generation share it.

use async_trait::async_trait;
use tracing::{info, warn};

/// At most one regeneration after the first attempt.
pub const MAX_AI_ATTEMPTS: u32 = 2;

/// What to do with an assessed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Accept,
    /// Not good enough, but worth one more attempt.
    Retry,
    /// Give up on AI output and use the fallback.
    Abandon,
}

/// An assessment of one output.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub next: Next,
    pub score: f64,
    pub issues: Vec<String>,
}

impl Assessment {
    pub fn accept(score: f64, issues: Vec<String>) -> Self {
        Self {
            next: Next::Accept,
            score,
            issues,
        }
    }

    pub fn retry(score: f64, issues: Vec<String>) -> Self {
        Self {
            next: Next::Retry,
            score,
            issues,
        }
    }

    pub fn abandon(score: f64, issues: Vec<String>) -> Self {
        Self {
            next: Next::Abandon,
            score,
            issues,
        }
    }
}

/// One kind of generation the policy can drive.
#[async_trait]
pub trait Attempt: Send + Sync {
    type Output: Send;
    type Error: std::fmt::Display + Send;

    /// Produce output for 1-based `attempt`, given the assessment of the previous one.
    async fn generate(
        &self,
        attempt: u32,
        previous: Option<&Assessment>,
    ) -> Result<Self::Output, Self::Error>;

    async fn assess(&self, output: &Self::Output) -> Assessment;

    /// Deterministic output that never fails.
    fn fallback(&self) -> Self::Output;

    /// Score the fallback for the record. Its `next` is ignored.
    async fn assess_fallback(&self, output: &Self::Output) -> Assessment;
}

/// The result of running the policy.
#[derive(Debug, Clone)]
pub struct PolicyOutcome<T> {
    pub value: T,
    pub assessment: Assessment,
    /// AI attempts made, whether or not they produced output.
    pub ai_attempts: u32,
    pub used_fallback: bool,
}

/// Generate, assess, regenerate once if worthwhile, else fall back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryThenFallback;

impl RetryThenFallback {
    pub fn new() -> Self {
        Self
    }

    pub async fn run<A: Attempt + ?Sized>(&self, attempt: &A) -> PolicyOutcome<A::Output> {
        let mut previous: Option<Assessment> = None;
        let mut ai_attempts = 0;

        for n in 1..=MAX_AI_ATTEMPTS {
            ai_attempts = n;
            match attempt.generate(n, previous.as_ref()).await {
                Ok(output) => {
                    let assessment = attempt.assess(&output).await;
                    match assessment.next {
                        Next::Accept => {
                            info!(attempt = n, score = assessment.score, "attempt accepted");
                            return PolicyOutcome {
                                value: output,
                                assessment,
                                ai_attempts,
                                used_fallback: false,
                            };
                        }
                        Next::Retry => {
                            info!(
                                attempt = n,
                                score = assessment.score,
                                issues = assessment.issues.len(),
                                "attempt revisable"
                            );
                            previous = Some(assessment);
                        }
                        Next::Abandon => {
                            warn!(
                                attempt = n,
                                score = assessment.score,
                                "attempt unsalvageable, skipping to fallback"
                            );
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt = n, error = %e, "generation attempt failed");
                    previous = Some(Assessment::retry(0.0, vec![e.to_string()]));
                }
            }
        }

        let value = attempt.fallback();
        let assessment = attempt.assess_fallback(&value).await;
        warn!(
            ai_attempts,
            score = assessment.score,
            "fallback used"
        );
        PolicyOutcome {
            value,
            assessment,
            ai_attempts,
            used_fallback: true,
        }
    }
}
