//! Episode summaries: provider first, rules when the provider fails.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::record::{SummarySource, WorkingEvent};
use crate::character::Stat;
use crate::error::{ReplyError, SchemaValidationError};
use crate::generation::schema::require_text;
use crate::generation::{parse_payload, ChatMessage, GenerationClient};

/// Key events kept per episode.
const MAX_KEY_EVENTS: usize = 8;

/// An episode's content before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeDraft {
    pub summary: String,
    pub key_events: Vec<String>,
    pub participants: Vec<String>,
    pub stat_change_totals: BTreeMap<Stat, i32>,
    pub generated_by: SummarySource,
}

/// Summarizes batches of working events.
pub struct Summarizer {
    client: Option<Arc<GenerationClient>>,
    word_cap: usize,
}

impl Summarizer {
    pub fn new(client: Arc<GenerationClient>, word_cap: usize) -> Self {
        Self {
            client: Some(client),
            word_cap,
        }
    }

    /// A summarizer that never calls the provider.
    pub fn rules_only(word_cap: usize) -> Self {
        Self {
            client: None,
            word_cap,
        }
    }

    /// Summarize `events`. Never fails.
    pub async fn summarize(&self, character_name: &str, events: &[WorkingEvent]) -> EpisodeDraft {
        let Some(client) = &self.client else {
            return rule_summary(character_name, events, self.word_cap);
        };

        let request = client
            .request(SUMMARY_SYSTEM_PROMPT)
            .with_temperature(client.config().analysis_temperature)
            .with_message(ChatMessage::user(summary_prompt(
                character_name,
                events,
                self.word_cap,
            )));

        let outcome = client
            .generate_parsed(&request, |text| {
                parse_summary(text).map_err(ReplyError::from)
            })
            .await
            .map(|(summary, _)| summary)
            .map_err(|e| e.to_string());

        match outcome {
            Ok((summary, key_events)) => {
                debug!(events = events.len(), "episode summarized by provider");
                EpisodeDraft {
                    summary: cap_words(&summary, self.word_cap),
                    key_events: key_events.into_iter().take(MAX_KEY_EVENTS).collect(),
                    participants: participants(events),
                    stat_change_totals: stat_totals(events),
                    generated_by: SummarySource::Provider,
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "summary provider failed, using rule-based summary");
                rule_summary(character_name, events, self.word_cap)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryPayload {
    summary: Option<String>,
    #[serde(default)]
    key_events: Vec<String>,
}

fn parse_summary(text: &str) -> Result<(String, Vec<String>), SchemaValidationError> {
    let payload: SummaryPayload = parse_payload(text)?;
    Ok((require_text(payload.summary, "summary")?, payload.key_events))
}

/// Deterministic summary: key events by type, participant counts, summed stat deltas.
pub fn rule_summary(character_name: &str, events: &[WorkingEvent], word_cap: usize) -> EpisodeDraft {
    let key_events: Vec<String> = events
        .iter()
        .filter(|e| e.event_type.is_key())
        .take(MAX_KEY_EVENTS)
        .map(|e| e.description.clone())
        .collect();
    let participants = participants(events);
    let totals = stat_totals(events);

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for event in events {
        *counts.entry(event.event_type.name()).or_insert(0) += 1;
    }

    let mut summary = format!("{} lived through {} recorded events", character_name, events.len());
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        summary.push_str(&format!(
            " between {} and {}",
            first.timestamp.format("%Y-%m-%d"),
            last.timestamp.format("%Y-%m-%d")
        ));
    }
    summary.push_str(". ");

    let breakdown = counts
        .iter()
        .map(|(kind, n)| format!("{n} {}", kind.replace('_', " ")))
        .collect::<Vec<_>>()
        .join(", ");
    summary.push_str(&format!("Breakdown: {breakdown}. "));

    if !key_events.is_empty() {
        summary.push_str(&format!("Highlights: {}. ", key_events.join("; ")));
    }
    if !participants.is_empty() {
        summary.push_str(&format!("Alongside: {}. ", participants.join(", ")));
    }
    if !totals.is_empty() {
        let deltas = totals
            .iter()
            .map(|(stat, delta)| format!("{stat} {delta:+}"))
            .collect::<Vec<_>>()
            .join(", ");
        summary.push_str(&format!("Stat changes: {deltas}."));
    }

    EpisodeDraft {
        summary: cap_words(summary.trim(), word_cap),
        key_events,
        participants,
        stat_change_totals: totals,
        generated_by: SummarySource::Rules,
    }
}

/// Truncate to at most `cap` words.
pub fn cap_words(text: &str, cap: usize) -> String {
    text.split_whitespace()
        .take(cap)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Participants ordered by how often they appear, then by name.
fn participants(events: &[WorkingEvent]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in events.iter().flat_map(|e| e.participants.iter()) {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().map(|(name, _)| name.to_string()).collect()
}

fn stat_totals(events: &[WorkingEvent]) -> BTreeMap<Stat, i32> {
    let mut totals = BTreeMap::new();
    for (stat, delta) in events.iter().flat_map(|e| e.stat_changes.iter()) {
        *totals.entry(*stat).or_insert(0) += delta;
    }
    totals.retain(|_, delta| *delta != 0);
    totals
}

const SUMMARY_SYSTEM_PROMPT: &str = "You condense a character's recent history into a short \
episode for later recall. Respond with a single JSON object and nothing else.";

fn summary_prompt(character_name: &str, events: &[WorkingEvent], word_cap: usize) -> String {
    let mut prompt = format!("Events for {character_name}, oldest first:\n");
    for event in events {
        prompt.push_str(&format!(
            "- [{}] {}: {}\n",
            event.timestamp.format("%Y-%m-%d"),
            event.event_type.name(),
            event.description
        ));
    }
    prompt.push_str(&format!(
        "\nReturn JSON: {{\"summary\": string of at most {word_cap} words, \
         \"key_events\": [string]}}"
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterId;
    use crate::config::GenerationConfig;
    use crate::error::GenerationProviderError;
    use crate::memory::record::{EventType, NewEvent};
    use crate::testing::ScriptedProvider;

    fn events() -> Vec<WorkingEvent> {
        let id = CharacterId::new();
        vec![
            WorkingEvent::from_new(
                id,
                NewEvent::new(EventType::Encounter, "Met Mother Quill at the well")
                    .with_participant("Mother Quill"),
            ),
            WorkingEvent::from_new(
                id,
                NewEvent::new(EventType::GoalCompleted, "Ran five miles")
                    .with_stat_change(Stat::Constitution, 2),
            ),
            WorkingEvent::from_new(
                id,
                NewEvent::new(EventType::ObjectiveCompleted, "Hauled the quarry stones")
                    .with_participant("Mother Quill")
                    .with_participant("Tamsin")
                    .with_stat_change(Stat::Strength, 1),
            ),
        ]
    }

    #[test]
    fn test_rule_summary_aggregates() {
        let draft = rule_summary("Mira", &events(), 250);
        assert_eq!(draft.generated_by, SummarySource::Rules);
        assert_eq!(draft.participants, vec!["Mother Quill", "Tamsin"]);
        assert_eq!(draft.stat_change_totals.get(&Stat::Constitution), Some(&2));
        assert_eq!(draft.key_events.len(), 2);
        assert!(draft.summary.contains("3 recorded events"));
    }

    #[test]
    fn test_cap_words() {
        assert_eq!(cap_words("one two three four", 2), "one two");
        assert_eq!(cap_words("one", 0), "");
        let draft = rule_summary("Mira", &events(), 5);
        assert!(draft.summary.split_whitespace().count() <= 5);
    }

    #[tokio::test]
    async fn test_provider_summary_is_capped() {
        let long = vec!["word"; 400].join(" ");
        let provider = Arc::new(ScriptedProvider::new().with_reply(format!(
            "{{\"summary\": \"{long}\", \"key_events\": [\"stones\"]}}"
        )));
        let client = Arc::new(GenerationClient::new(provider, GenerationConfig::default()));
        let draft = Summarizer::new(client, 250).summarize("Mira", &events()).await;

        assert_eq!(draft.generated_by, SummarySource::Provider);
        assert_eq!(draft.summary.split_whitespace().count(), 250);
        assert_eq!(draft.key_events, vec!["stones"]);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_rules() {
        let provider = Arc::new(
            ScriptedProvider::new().with_failure(GenerationProviderError::Unavailable("x".into())),
        );
        let client = Arc::new(GenerationClient::new(provider, GenerationConfig::default()));
        let draft = Summarizer::new(client, 250).summarize("Mira", &events()).await;
        assert_eq!(draft.generated_by, SummarySource::Rules);
    }
}
